// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! russh-backed implementation of the session traits.
//!
//! Address resolution tries each resolved address in turn until one accepts
//! the SSH handshake. Server host keys are accepted without verification and
//! their SHA-256 fingerprint is logged.

use async_trait::async_trait;
use russh::client::{Config, Handle, Handler, Msg, Session};
use russh::keys::ssh_key::HashAlg;
use russh::Channel;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::RemoteCommand;
use super::session::{RemoteSession, SessionConnector, SessionTransport};
use super::Error;
use crate::connector::seed::{RandomSeed, SeedSource};
use crate::forwarding::filter::StreamFilter;
use crate::forwarding::local::LocalForwarder;
use crate::forwarding::remote::{serve_forwarded_connection, RemoteForwardRegistry, RemoteTarget};

/// Session handle shared by forwards and the command console.
///
/// Some russh requests need exclusive access to the handle.
pub(crate) type SharedHandle = Arc<Mutex<Handle<ClientHandler>>>;

/// Opens russh sessions.
#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<Config>,
}

impl RusshConnector {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new(Config {
            inactivity_timeout: None,
            ..Default::default()
        })
    }
}

#[async_trait]
impl SessionConnector for RusshConnector {
    type Transport = Transport;

    async fn open(&self, host: &str, port: u16, seed: &RandomSeed) -> Result<Transport, Error> {
        // russh draws its own key-exchange randomness; the seed only tells us
        // how healthy the local entropy source looked.
        match seed.source() {
            SeedSource::Device => debug!("Local entropy device available"),
            SeedSource::SystemState => {
                debug!("Local entropy device unavailable, relying on russh RNG")
            }
        }

        let socket_addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(Error::AddressInvalid)?;

        let remote_forwards = RemoteForwardRegistry::default();
        let shutdown = CancellationToken::new();

        let mut connect_res = Err(Error::AddressInvalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            "could not resolve to any addresses",
        )));
        for socket_addr in socket_addrs {
            let handler = ClientHandler {
                hostname: host.to_string(),
                host: socket_addr,
                remote_forwards: remote_forwards.clone(),
                shutdown: shutdown.clone(),
            };
            match russh::client::connect(self.config.clone(), socket_addr, handler).await {
                Ok(h) => {
                    connect_res = Ok((socket_addr, h));
                    break;
                }
                Err(e) => {
                    debug!("Connection attempt to {} failed: {}", socket_addr, e);
                    connect_res = Err(e);
                }
            }
        }
        let (address, handle) = connect_res?;
        info!("Connected to {} ({})", host, address);

        Ok(Transport {
            handle,
            hostname: host.to_string(),
            address,
            remote_forwards,
            shutdown,
        })
    }
}

/// Connected, not yet authenticated session.
pub struct Transport {
    handle: Handle<ClientHandler>,
    hostname: String,
    address: SocketAddr,
    remote_forwards: RemoteForwardRegistry,
    shutdown: CancellationToken,
}

#[async_trait]
impl SessionTransport for Transport {
    type Session = Client;

    async fn authenticate(mut self, username: &str, password: &str) -> Result<Client, Error> {
        let result = self
            .handle
            .authenticate_password(username, password)
            .await?;
        if !result.success() {
            return Err(Error::PasswordWrong(username.to_string()));
        }
        debug!("Authenticated as {}", username);

        Ok(Client {
            connection_handle: Arc::new(Mutex::new(self.handle)),
            hostname: self.hostname,
            username: username.to_string(),
            address: self.address,
            remote_forwards: self.remote_forwards,
            shutdown: self.shutdown,
        })
    }
}

/// An authenticated SSH session.
#[derive(Clone)]
pub struct Client {
    connection_handle: SharedHandle,
    hostname: String,
    username: String,
    address: SocketAddr,
    remote_forwards: RemoteForwardRegistry,
    shutdown: CancellationToken,
}

impl Client {
    /// Open a `direct-tcpip` channel; the server connects to `host:port`.
    ///
    /// The host is sent as given so the server performs name resolution.
    pub async fn open_direct_tcpip_channel(
        &self,
        host: &str,
        port: u16,
        originator: Option<SocketAddr>,
    ) -> Result<Channel<Msg>, Error> {
        let (orig_host, orig_port) = originator
            .map(|src| (src.ip().to_string(), u32::from(src.port())))
            .unwrap_or_else(|| ("127.0.0.1".to_string(), 22));

        let channel = self
            .connection_handle
            .lock()
            .await
            .channel_open_direct_tcpip(host, u32::from(port), orig_host, orig_port)
            .await?;
        Ok(channel)
    }

    pub(crate) fn handle(&self) -> SharedHandle {
        Arc::clone(&self.connection_handle)
    }
}

#[async_trait]
impl RemoteSession for Client {
    type Console = RemoteCommand;

    async fn register_local_forward(
        &self,
        bind_host: &str,
        bind_port: u16,
        dest_host: &str,
        dest_port: u16,
        filter: Option<StreamFilter>,
    ) -> Result<(), Error> {
        let forwarder = LocalForwarder::bind(
            self.clone(),
            bind_host,
            bind_port,
            dest_host,
            dest_port,
            filter,
        )
        .await?;
        forwarder.spawn(self.shutdown.child_token());
        Ok(())
    }

    async fn register_remote_forward(
        &self,
        bind_host: &str,
        bind_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<(), Error> {
        let bound_port = self
            .connection_handle
            .lock()
            .await
            .tcpip_forward(bind_host, u32::from(bind_port))
            .await
            .map_err(|source| Error::ForwardRejected {
                address: format!("{bind_host}:{bind_port}"),
                source,
            })?;
        // Port 0 asks the server to pick one
        let bound_port = if bind_port == 0 {
            let allocated = u16::try_from(bound_port).unwrap_or(bind_port);
            info!("Server allocated port {} for {}", allocated, bind_host);
            allocated
        } else {
            bind_port
        };

        self.remote_forwards
            .register(
                bind_host,
                bound_port,
                RemoteTarget {
                    host: dest_host.to_string(),
                    port: dest_port,
                },
            )
            .await;
        Ok(())
    }

    fn console(&self) -> RemoteCommand {
        RemoteCommand::new(self.handle())
    }

    async fn disconnect(&self, reason: &str) -> Result<(), Error> {
        debug!("Disconnecting from {}: {}", self.hostname, reason);
        self.shutdown.cancel();
        self.connection_handle
            .lock()
            .await
            .disconnect(russh::Disconnect::ByApplication, reason, "en")
            .await?;
        Ok(())
    }
}

impl Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("address", &self.address)
            .field("connection_handle", &"Handle<ClientHandler>")
            .finish()
    }
}

/// Per-connection russh event handler.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    host: SocketAddr,
    remote_forwards: RemoteForwardRegistry,
    shutdown: CancellationToken,
}

impl Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Host key for {} ({}): {}",
            self.hostname,
            self.host,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            "Server opened forwarded-tcpip channel: {}:{} from {}:{}",
            connected_address, connected_port, originator_address, originator_port
        );

        let target = match u16::try_from(connected_port) {
            Ok(port) => self.remote_forwards.lookup(connected_address, port).await,
            Err(_) => None,
        };
        let Some(target) = target else {
            warn!(
                "No remote forward registered for {}:{}, closing channel",
                connected_address, connected_port
            );
            let _ = channel.close().await;
            return Ok(());
        };

        let originator = format!("{originator_address}:{originator_port}");
        let cancel_token = self.shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = serve_forwarded_connection(channel, target, originator, cancel_token).await
            {
                warn!("Forwarded connection failed: {}", e);
            }
        });

        Ok(())
    }
}

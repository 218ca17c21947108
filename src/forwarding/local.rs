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

//! Local port forwarding (`localN` entries).
//!
//! ```text
//! [Client] → [Local Listener] → [SSH Channel] → [Remote Host:Port]
//!              ↑ bind_host:bind_port              ↑ remote_host:remote_port
//! ```
//!
//! The listener is bound while the forward is being registered, so a port
//! that is already taken fails registration right away. Accepted
//! connections each get their own `direct-tcpip` channel.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::filter::StreamFilter;
use super::tunnel::{Tunnel, TunnelStats};
use crate::ssh::{Client, Error};

/// Counters shared by all connections of one forward
#[derive(Debug, Default)]
struct LocalForwarderStats {
    connections_accepted: AtomicU64,
    active_connections: AtomicU64,
    connections_failed: AtomicU64,
    total_bytes_transferred: AtomicU64,
}

/// A bound local forward waiting to be started
pub struct LocalForwarder {
    listener: TcpListener,
    local_addr: SocketAddr,
    remote_host: String,
    remote_port: u16,
    filter: Option<StreamFilter>,
    ssh_client: Client,
    stats: Arc<LocalForwarderStats>,
}

impl LocalForwarder {
    /// Bind `bind_host:bind_port`.
    pub async fn bind(
        ssh_client: Client,
        bind_host: &str,
        bind_port: u16,
        remote_host: &str,
        remote_port: u16,
        filter: Option<StreamFilter>,
    ) -> Result<Self, Error> {
        let bind_error = |source| Error::LocalBind {
            address: format!("{bind_host}:{bind_port}"),
            source,
        };
        let listener = TcpListener::bind((bind_host, bind_port))
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(
            "Local forwarding listening on {} → {}:{}",
            local_addr, remote_host, remote_port
        );

        Ok(Self {
            listener,
            local_addr,
            remote_host: remote_host.to_string(),
            remote_port,
            filter,
            ssh_client,
            stats: Arc::new(LocalForwarderStats::default()),
        })
    }

    /// Serve connections in the background until `cancel_token` fires.
    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.accept_loop(cancel_token))
    }

    async fn accept_loop(self, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            trace!("Accepted connection from {}", peer_addr);
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                            self.spawn_connection_handler(stream, peer_addr, cancel_token.child_token());
                        }
                        Err(e) => {
                            error!("Failed to accept connection on {}: {}", self.local_addr, e);
                            self.stats.connections_failed.fetch_add(1, Ordering::Relaxed);

                            // Brief pause to avoid busy loop on persistent errors
                            sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }

        info!(
            "Local forwarding on {} stopped: {} connections, {} failed, {} bytes",
            self.local_addr,
            self.stats.connections_accepted.load(Ordering::Relaxed),
            self.stats.connections_failed.load(Ordering::Relaxed),
            self.stats.total_bytes_transferred.load(Ordering::Relaxed)
        );
    }

    fn spawn_connection_handler(
        &self,
        tcp_stream: TcpStream,
        peer_addr: SocketAddr,
        cancel_token: CancellationToken,
    ) {
        let remote_host = self.remote_host.clone();
        let remote_port = self.remote_port;
        let ssh_client = self.ssh_client.clone();
        let filter = self.filter.clone();
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            stats.active_connections.fetch_add(1, Ordering::Relaxed);

            let result = Self::handle_connection(
                tcp_stream,
                peer_addr,
                &remote_host,
                remote_port,
                &ssh_client,
                filter,
                cancel_token,
            )
            .await;

            stats.active_connections.fetch_sub(1, Ordering::Relaxed);

            match result {
                Ok(tunnel_stats) => {
                    debug!(
                        "Connection from {} completed: {} bytes transferred",
                        peer_addr,
                        tunnel_stats.total_bytes()
                    );
                    stats
                        .total_bytes_transferred
                        .fetch_add(tunnel_stats.total_bytes(), Ordering::Relaxed);
                }
                Err(e) => {
                    error!("Connection from {} failed: {:#}", peer_addr, e);
                    stats.connections_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    async fn handle_connection(
        tcp_stream: TcpStream,
        peer_addr: SocketAddr,
        remote_host: &str,
        remote_port: u16,
        ssh_client: &Client,
        filter: Option<StreamFilter>,
        cancel_token: CancellationToken,
    ) -> Result<TunnelStats> {
        debug!("Creating SSH channel to {}:{}", remote_host, remote_port);

        let ssh_channel = ssh_client
            .open_direct_tcpip_channel(remote_host, remote_port, Some(peer_addr))
            .await
            .with_context(|| {
                format!("Failed to create SSH channel to {remote_host}:{remote_port}")
            })?;

        let connection_filter = filter.map(|filter| {
            filter.connection(
                ssh_client,
                &peer_addr.to_string(),
                remote_host,
                remote_port,
                cancel_token.clone(),
            )
        });

        Tunnel::run(tcp_stream, ssh_channel, cancel_token, connection_filter).await
    }
}

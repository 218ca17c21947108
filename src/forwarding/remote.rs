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

//! Remote port forwarding (`remoteN` entries).
//!
//! ```text
//! [Remote Client] → [SSH Server Listener] → [SSH Channel] → [Local Host:Port]
//!                     ↑ bind_host:bind_port                  ↑ host:port
//! ```
//!
//! The server announces each accepted connection by opening a
//! `forwarded-tcpip` channel that names the address and port it listened
//! on. [`RemoteForwardRegistry`] maps that pair back to the destination
//! given when the forward was registered.

use anyhow::{Context, Result};
use russh::client::Msg;
use russh::Channel;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tunnel::{Tunnel, TunnelStats};

/// Where connections of one remote forward are relayed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
}

/// Remote forwards of one session, keyed by (bind address, bound port)
#[derive(Debug, Clone, Default)]
pub struct RemoteForwardRegistry {
    forwards: Arc<RwLock<HashMap<(String, u16), RemoteTarget>>>,
}

impl RemoteForwardRegistry {
    pub async fn register(&self, bind_address: &str, bound_port: u16, target: RemoteTarget) {
        debug!(
            "Registered remote forward {}:{} → {}:{}",
            bind_address, bound_port, target.host, target.port
        );
        self.forwards
            .write()
            .await
            .insert((bind_address.to_string(), bound_port), target);
    }

    /// Find the target for a connection the server accepted.
    ///
    /// Servers may report the address they actually bound rather than the
    /// one requested (`localhost` vs `127.0.0.1`), so a port-only match is
    /// accepted when the exact pair is unknown.
    pub async fn lookup(&self, connected_address: &str, connected_port: u16) -> Option<RemoteTarget> {
        let forwards = self.forwards.read().await;
        forwards
            .get(&(connected_address.to_string(), connected_port))
            .or_else(|| {
                forwards
                    .iter()
                    .find(|((_, port), _)| *port == connected_port)
                    .map(|(_, target)| target)
            })
            .cloned()
    }
}

/// Connect to the target and relay the forwarded channel to it.
pub async fn serve_forwarded_connection(
    channel: Channel<Msg>,
    target: RemoteTarget,
    originator: String,
    cancel_token: CancellationToken,
) -> Result<TunnelStats> {
    let destination = format!("{}:{}", target.host, target.port);
    let tcp_stream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .with_context(|| format!("Failed to connect to {destination}"))?;
    if let Err(e) = tcp_stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    info!("Bridging forwarded connection from {} → {}", originator, destination);

    Tunnel::run(tcp_stream, channel, cancel_token, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(host: &str, port: u16) -> RemoteTarget {
        RemoteTarget {
            host: host.to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn test_lookup_exact_match() {
        let registry = RemoteForwardRegistry::default();
        registry.register("0.0.0.0", 8080, target("localhost", 80)).await;
        registry.register("127.0.0.1", 9090, target("db", 5432)).await;

        assert_eq!(
            registry.lookup("127.0.0.1", 9090).await,
            Some(target("db", 5432))
        );
        assert_eq!(
            registry.lookup("0.0.0.0", 8080).await,
            Some(target("localhost", 80))
        );
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_port() {
        let registry = RemoteForwardRegistry::default();
        registry.register("localhost", 8080, target("web", 80)).await;

        assert_eq!(
            registry.lookup("127.0.0.1", 8080).await,
            Some(target("web", 80))
        );
        assert_eq!(registry.lookup("127.0.0.1", 8081).await, None);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let registry = RemoteForwardRegistry::default();
        let handler_view = registry.clone();
        assert!(handler_view.lookup("0.0.0.0", 2222).await.is_none());

        registry.register("0.0.0.0", 2222, target("host", 22)).await;
        assert!(handler_view.lookup("0.0.0.0", 2222).await.is_some());
    }
}

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

//! FTP control-channel proxy for `/ftp/` forwards.
//!
//! Forwarding only the FTP control port is not enough: in passive mode the
//! server tells the client where to open the data connection, and that
//! address is usually unreachable from the client's side of the tunnel.
//! The proxy watches server replies on the control connection and, for
//! every passive-mode reply, opens a one-shot local listener whose single
//! connection is tunnelled to the address the server advertised. The reply
//! is rewritten to advertise the local listener instead.
//!
//! ```text
//! 227 Entering Passive Mode (10,0,0,5,195,80)   server → proxy
//! 227 Entering Passive Mode (127,0,0,1,207,12)  proxy  → client
//! ```
//!
//! Only passive mode (`PASV`/`EPSV`) is supported.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ssh::Client;

/// How long a data listener waits for the client before giving up
pub const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Extract the data address from a `227` passive reply.
///
/// Servers vary in the surrounding text, so the first run of six
/// comma-separated numbers after the code is taken.
pub fn parse_pasv_reply(line: &str) -> Option<SocketAddrV4> {
    let text = line.strip_prefix("227")?;
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let numbers: Vec<u8> = text[start..]
        .split(|c: char| !(c.is_ascii_digit() || c == ','))
        .next()?
        .split(',')
        .map(|n| n.parse::<u8>().ok())
        .collect::<Option<_>>()?;

    let [a, b, c, d, p1, p2]: [u8; 6] = numbers.try_into().ok()?;
    Some(SocketAddrV4::new(
        Ipv4Addr::new(a, b, c, d),
        u16::from_be_bytes([p1, p2]),
    ))
}

pub fn format_pasv_reply(addr: SocketAddrV4) -> String {
    let [a, b, c, d] = addr.ip().octets();
    let [p1, p2] = addr.port().to_be_bytes();
    format!("227 Entering Passive Mode ({a},{b},{c},{d},{p1},{p2}).\r\n")
}

/// Extract the port from a `229` extended passive reply, `(|||port|)`.
pub fn parse_epsv_reply(line: &str) -> Option<u16> {
    let text = line.strip_prefix("229")?;
    let open = text.find('(')?;
    let mut inner = text[open + 1..].chars();
    let delim = inner.next()?;
    if inner.next()? != delim || inner.next()? != delim {
        return None;
    }
    let rest = inner.as_str();
    let end = rest.find(delim)?;
    rest[..end].parse().ok()
}

pub fn format_epsv_reply(port: u16) -> String {
    format!("229 Entering Extended Passive Mode (|||{port}|)\r\n")
}

/// Splits a byte stream into `\n`-terminated lines, keeping terminators.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `data` and return every line it completed.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            lines.push(self.pending.drain(..=pos).collect());
        }
        lines
    }

    /// Bytes of an unterminated trailing line.
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

/// Host the data connection of a `227` reply is tunnelled to.
///
/// An unspecified address means "the host you are already talking to", which
/// from our side of the session is `server_host`.
pub fn passive_target(advertised: SocketAddrV4, server_host: &str) -> String {
    if advertised.ip().is_unspecified() {
        server_host.to_string()
    } else {
        advertised.ip().to_string()
    }
}

/// Address a client can reach a listener bound to `bound` on.
///
/// Wildcard binds are advertised as the loopback address of the same family.
pub fn advertised_addr(bound: SocketAddr) -> SocketAddr {
    let mut advertised = bound;
    if bound.ip().is_unspecified() {
        advertised.set_ip(match bound.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        });
    }
    advertised
}

/// Opens the data path announced by one passive reply.
#[async_trait]
pub trait DataRelay: Send + Sync {
    /// Bind a one-shot listener on `local_host` whose single connection is
    /// tunnelled to `target_host:target_port`. Returns the bound address.
    async fn open(
        &self,
        local_host: &str,
        target_host: &str,
        target_port: u16,
    ) -> Result<SocketAddr>;
}

/// [`DataRelay`] that tunnels data connections through the SSH session.
pub struct SessionDataRelay {
    client: Client,
    shutdown: CancellationToken,
}

impl SessionDataRelay {
    pub(crate) fn new(client: Client, shutdown: CancellationToken) -> Self {
        Self { client, shutdown }
    }
}

#[async_trait]
impl DataRelay for SessionDataRelay {
    async fn open(
        &self,
        local_host: &str,
        target_host: &str,
        target_port: u16,
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind((local_host, 0))
            .await
            .with_context(|| format!("Failed to bind FTP data listener on {local_host}"))?;
        let bound = listener
            .local_addr()
            .context("Failed to get FTP data listener address")?;
        info!(
            "FTP passive data {}:{} relayed via {}",
            target_host, target_port, bound
        );

        let client = self.client.clone();
        let cancel_token = self.shutdown.child_token();
        let target_host = target_host.to_string();
        tokio::spawn(async move {
            let Some((mut tcp_stream, peer_addr)) =
                accept_data_connection(listener, &cancel_token, DATA_ACCEPT_TIMEOUT).await
            else {
                return;
            };

            let channel = match client
                .open_direct_tcpip_channel(&target_host, target_port, Some(peer_addr))
                .await
            {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(
                        "Failed to open FTP data channel to {}:{}: {}",
                        target_host, target_port, e
                    );
                    return;
                }
            };
            let mut remote_stream = channel.into_stream();
            tokio::select! {
                result = tokio::io::copy_bidirectional(&mut tcp_stream, &mut remote_stream) => {
                    match result {
                        Ok((up, down)) => debug!(
                            "FTP data connection from {} closed: {} bytes up, {} bytes down",
                            peer_addr, up, down
                        ),
                        Err(e) => debug!("FTP data connection from {} ended: {}", peer_addr, e),
                    }
                }
                _ = cancel_token.cancelled() => {}
            }
        });

        Ok(bound)
    }
}

/// Wait for the single connection of a data listener.
///
/// The listener is dropped after one connection or when `wait` runs out.
/// Session shutdown stops the wait early.
async fn accept_data_connection(
    listener: TcpListener,
    cancel_token: &CancellationToken,
    wait: Duration,
) -> Option<(TcpStream, SocketAddr)> {
    let bound = listener.local_addr().ok();
    tokio::select! {
        result = tokio::time::timeout(wait, listener.accept()) => match result {
            Ok(Ok(accepted)) => Some(accepted),
            Ok(Err(e)) => {
                warn!("FTP data listener failed to accept: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "No FTP data connection on {:?} within {:?}, closing listener",
                    bound, wait
                );
                None
            }
        },
        _ = cancel_token.cancelled() => None,
    }
}

/// Per-connection state of the FTP proxy.
pub struct FtpProxySession<R: DataRelay = SessionDataRelay> {
    relay: R,
    local_host: String,
    server_host: String,
    destination_host: String,
    lines: LineBuffer,
}

impl<R: DataRelay> FtpProxySession<R> {
    /// `local_host` is where data listeners bind; `server_host` replaces an
    /// unspecified passive address; `destination_host` is the control
    /// connection's target, used for extended passive replies.
    pub(crate) fn new(
        relay: R,
        local_host: &str,
        server_host: &str,
        destination_host: &str,
    ) -> Self {
        Self {
            relay,
            local_host: local_host.to_string(),
            server_host: server_host.to_string(),
            destination_host: destination_host.to_string(),
            lines: LineBuffer::default(),
        }
    }

    /// Rewrite server replies. Incomplete lines are held back until their
    /// terminator arrives.
    pub async fn server_reply(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len());
        for line in self.lines.push(data) {
            out.extend(self.rewrite_line(line).await?);
        }
        Ok(out)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        self.lines.take_pending()
    }

    async fn rewrite_line(&self, line: Vec<u8>) -> Result<Vec<u8>> {
        let Ok(text) = std::str::from_utf8(&line) else {
            return Ok(line);
        };

        if let Some(advertised) = parse_pasv_reply(text) {
            if self.local_host.parse::<Ipv6Addr>().is_ok() {
                warn!(
                    "Data listeners bind on IPv6 host {} which a PASV reply cannot carry",
                    self.local_host
                );
                return Ok(line);
            }
            let target_host = passive_target(advertised, &self.server_host);
            let bound = self
                .relay
                .open(&self.local_host, &target_host, advertised.port())
                .await?;
            return match advertised_addr(bound) {
                SocketAddr::V4(relay) => Ok(format_pasv_reply(relay).into_bytes()),
                SocketAddr::V6(relay) => {
                    warn!(
                        "Data listener {} is IPv6 and cannot be advertised in a PASV reply",
                        relay
                    );
                    Ok(line)
                }
            };
        }

        if let Some(port) = parse_epsv_reply(text) {
            let bound = self
                .relay
                .open(&self.local_host, &self.destination_host, port)
                .await?;
            return Ok(format_epsv_reply(bound.port()).into_bytes());
        }

        Ok(line)
    }
}

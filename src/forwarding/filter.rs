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

//! Stream filters attached to forwards by their plugin segment.
//!
//! A [`StreamFilter`] is the per-forward factory; every tunnelled connection
//! gets its own [`ConnectionFilter`] holding that connection's state.

use anyhow::Result;
use std::borrow::Cow;
use std::fmt;
use tokio_util::sync::CancellationToken;

use super::ftp::{FtpProxySession, SessionDataRelay};
use super::sniffer::Sniffer;
use super::spec::PluginKind;
use crate::ssh::Client;

/// Direction of relayed bytes, seen from the forwarding side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LocalToRemote => write!(f, "→"),
            Direction::RemoteToLocal => write!(f, "←"),
        }
    }
}

/// Filter configuration for one forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFilter {
    /// Rewrite FTP passive replies so data connections also travel through
    /// the session. Data listeners bind on `local_host`; `server_host`
    /// replaces an unspecified passive address.
    FtpProxy {
        local_host: String,
        server_host: String,
    },
    /// Log every relayed chunk
    Sniffer,
}

impl StreamFilter {
    /// Filter for a parsed plugin, or `None` for a plain relay.
    pub fn for_plugin(plugin: PluginKind, local_host: &str, server_host: &str) -> Option<Self> {
        match plugin {
            PluginKind::General => None,
            PluginKind::FtpProxy => Some(StreamFilter::FtpProxy {
                local_host: local_host.to_string(),
                server_host: server_host.to_string(),
            }),
            PluginKind::Sniffer => Some(StreamFilter::Sniffer),
        }
    }

    /// State for one tunnelled connection from `peer` to `target`.
    pub(crate) fn connection(
        &self,
        client: &Client,
        peer: &str,
        target_host: &str,
        target_port: u16,
        shutdown: CancellationToken,
    ) -> ConnectionFilter {
        match self {
            StreamFilter::FtpProxy {
                local_host,
                server_host,
            } => ConnectionFilter::FtpProxy(FtpProxySession::new(
                SessionDataRelay::new(client.clone(), shutdown),
                local_host,
                server_host,
                target_host,
            )),
            StreamFilter::Sniffer => ConnectionFilter::Sniffer(Sniffer::new(
                peer,
                format!("{target_host}:{target_port}"),
            )),
        }
    }
}

/// Filter state of a single tunnelled connection
pub enum ConnectionFilter {
    FtpProxy(FtpProxySession),
    Sniffer(Sniffer),
}

impl ConnectionFilter {
    pub async fn local_to_remote<'a>(&mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        match self {
            // Client commands pass untouched
            ConnectionFilter::FtpProxy(_) => Ok(Cow::Borrowed(data)),
            ConnectionFilter::Sniffer(sniffer) => {
                sniffer.record(Direction::LocalToRemote, data);
                Ok(Cow::Borrowed(data))
            }
        }
    }

    pub async fn remote_to_local<'a>(&mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        match self {
            ConnectionFilter::FtpProxy(proxy) => Ok(Cow::Owned(proxy.server_reply(data).await?)),
            ConnectionFilter::Sniffer(sniffer) => {
                sniffer.record(Direction::RemoteToLocal, data);
                Ok(Cow::Borrowed(data))
            }
        }
    }

    /// Bytes still held back when the remote side finished.
    pub fn finish(&mut self) -> Vec<u8> {
        match self {
            ConnectionFilter::FtpProxy(proxy) => proxy.finish(),
            ConnectionFilter::Sniffer(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_plugin() {
        assert_eq!(
            StreamFilter::for_plugin(PluginKind::General, "0.0.0.0", "srv"),
            None
        );
        assert_eq!(
            StreamFilter::for_plugin(PluginKind::Sniffer, "0.0.0.0", "srv"),
            Some(StreamFilter::Sniffer)
        );
        assert_eq!(
            StreamFilter::for_plugin(PluginKind::FtpProxy, "127.0.0.1", "srv"),
            Some(StreamFilter::FtpProxy {
                local_host: "127.0.0.1".to_string(),
                server_host: "srv".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_sniffer_passes_bytes_through() {
        let mut filter = ConnectionFilter::Sniffer(Sniffer::new("127.0.0.1:5000", "db:5432"));
        let data = b"SELECT 1;";
        assert!(matches!(
            filter.local_to_remote(data).await.unwrap(),
            Cow::Borrowed(b) if b == data
        ));
        assert_eq!(&*filter.remote_to_local(b"ok").await.unwrap(), b"ok");
        assert!(filter.finish().is_empty());
    }
}

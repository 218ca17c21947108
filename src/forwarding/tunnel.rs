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

//! Bidirectional byte pump between a local stream and an SSH channel.
//!
//! Both local and remote forwards end up here once they hold a connected
//! socket and an open channel. A single loop polls both sides; when the
//! forward carries a [`ConnectionFilter`] every chunk passes through it
//! before being written to the other side.
//!
//! Each direction closes on its own. End-of-stream from the local socket is
//! passed on as a channel EOF while replies keep flowing back, and a channel
//! EOF shuts down the socket's write half while local data keeps flowing
//! out. The tunnel ends once both directions are done or the channel
//! closes; cancellation ends it early.

use anyhow::Result;
use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use std::borrow::Cow;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::filter::ConnectionFilter;

const TUNNEL_BUFFER_SIZE: usize = 32 * 1024;

/// What the remote end of a tunnel delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Data(Vec<u8>),
    /// The peer will send no more data but may still receive
    Eof,
    Closed,
}

/// Remote end of a tunnel.
#[async_trait]
pub trait ChannelEndpoint: Send {
    /// Next event, `None` once the channel is gone.
    async fn recv(&mut self) -> Option<ChannelEvent>;
    async fn send(&mut self, data: &[u8]) -> Result<()>;
    async fn send_eof(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl ChannelEndpoint for Channel<Msg> {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.wait().await? {
                ChannelMsg::Data { data } => return Some(ChannelEvent::Data(data.to_vec())),
                ChannelMsg::Eof => return Some(ChannelEvent::Eof),
                ChannelMsg::Close => return Some(ChannelEvent::Closed),
                other => trace!("Ignoring SSH channel message: {:?}", other),
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.data(data).await?;
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<()> {
        self.eof().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Channel::close(self).await?;
        Ok(())
    }
}

/// Byte counters of a finished tunnel
#[derive(Debug, Clone)]
pub struct TunnelStats {
    pub bytes_local_to_remote: u64,
    pub bytes_remote_to_local: u64,
    pub started_at: Instant,
}

impl TunnelStats {
    fn new() -> Self {
        Self {
            bytes_local_to_remote: 0,
            bytes_remote_to_local: 0,
            started_at: Instant::now(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_local_to_remote + self.bytes_remote_to_local
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}

pub struct Tunnel;

impl Tunnel {
    /// Relay bytes until both directions have finished or the channel
    /// closes. `cancel_token` stops the relay early.
    ///
    /// The channel is closed and the stream shut down on every exit path,
    /// including errors.
    pub async fn run<S, C>(
        mut stream: S,
        mut channel: C,
        cancel_token: CancellationToken,
        mut filter: Option<ConnectionFilter>,
    ) -> Result<TunnelStats>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        C: ChannelEndpoint,
    {
        let mut stats = TunnelStats::new();
        let mut buffer = vec![0u8; TUNNEL_BUFFER_SIZE];
        // Still reading from the local stream / from the channel
        let mut local_open = true;
        let mut remote_open = true;

        debug!("Starting bidirectional tunnel");

        let outcome: Result<()> = async {
            while local_open || remote_open {
                tokio::select! {
                    result = stream.read(&mut buffer), if local_open => {
                        match result {
                            Ok(0) => {
                                trace!("Local stream reached EOF, half-closing SSH channel");
                                local_open = false;
                                channel.send_eof().await?;
                            }
                            Ok(n) => {
                                let chunk = match filter.as_mut() {
                                    Some(filter) => filter.local_to_remote(&buffer[..n]).await?,
                                    None => Cow::Borrowed(&buffer[..n]),
                                };
                                if let Err(e) = channel.send(&chunk).await {
                                    error!("Failed to write to SSH channel: {}", e);
                                    return Err(e.context("SSH channel write error"));
                                }
                                stats.bytes_local_to_remote += chunk.len() as u64;
                                trace!("Forwarded {} bytes TCP→SSH", chunk.len());
                            }
                            Err(e) if matches!(e.kind(), ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset) => {
                                trace!("TCP connection closed: {}", e);
                                break;
                            }
                            Err(e) => {
                                error!("TCP read error: {}", e);
                                return Err(anyhow::anyhow!("TCP read error: {}", e));
                            }
                        }
                    }
                    event = channel.recv(), if remote_open => {
                        match event {
                            Some(ChannelEvent::Data(data)) => {
                                let chunk = match filter.as_mut() {
                                    Some(filter) => filter.remote_to_local(&data).await?,
                                    None => Cow::Borrowed(&data[..]),
                                };
                                match stream.write_all(&chunk).await {
                                    Ok(()) => {
                                        stats.bytes_remote_to_local += chunk.len() as u64;
                                        trace!("Forwarded {} bytes SSH→TCP", chunk.len());
                                    }
                                    Err(e) if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset) => {
                                        trace!("TCP connection closed: {}", e);
                                        break;
                                    }
                                    Err(e) => {
                                        error!("TCP write error: {}", e);
                                        return Err(anyhow::anyhow!("TCP write error: {}", e));
                                    }
                                }
                            }
                            Some(ChannelEvent::Eof) => {
                                trace!("SSH channel reached EOF, half-closing local stream");
                                remote_open = false;
                                flush_filter(&mut stream, filter.as_mut()).await;
                                if let Err(e) = stream.shutdown().await {
                                    debug!("Failed to half-close TCP stream: {}", e);
                                }
                            }
                            Some(ChannelEvent::Closed) | None => {
                                trace!("SSH channel closed");
                                if remote_open {
                                    remote_open = false;
                                    flush_filter(&mut stream, filter.as_mut()).await;
                                }
                                break;
                            }
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        trace!("Tunnel cancelled");
                        break;
                    }
                }
            }
            Ok(())
        }
        .await;

        if local_open {
            if let Err(e) = channel.send_eof().await {
                debug!("Failed to send EOF to SSH channel: {}", e);
            }
        }
        if let Err(e) = channel.close().await {
            debug!("Failed to close SSH channel: {}", e);
        }
        if let Err(e) = stream.shutdown().await {
            if remote_open {
                warn!("Failed to shut down TCP stream: {}", e);
            }
        }

        debug!(
            "Tunnel completed: {} bytes L→R, {} bytes R→L, duration: {:?}",
            stats.bytes_local_to_remote,
            stats.bytes_remote_to_local,
            stats.duration()
        );

        outcome.map(|()| stats)
    }
}

/// Write out whatever the filter still holds back.
async fn flush_filter<S>(stream: &mut S, filter: Option<&mut ConnectionFilter>)
where
    S: AsyncWrite + Unpin + Send,
{
    if let Some(filter) = filter {
        let rest = filter.finish();
        if !rest.is_empty() {
            if let Err(e) = stream.write_all(&rest).await {
                debug!("Failed to flush filtered bytes: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, Notify};

    #[derive(Debug, Default)]
    struct Sent {
        data: Vec<u8>,
        eof: bool,
        closed: bool,
    }

    /// Channel fed from a test-held sender that records what the tunnel sent.
    struct ScriptedChannel {
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        sent: Arc<Mutex<Sent>>,
        eof_sent: Arc<Notify>,
        fail_sends: bool,
    }

    struct Remote {
        events: mpsc::UnboundedSender<ChannelEvent>,
        sent: Arc<Mutex<Sent>>,
        eof_sent: Arc<Notify>,
    }

    fn scripted_channel() -> (ScriptedChannel, Remote) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Sent::default()));
        let eof_sent = Arc::new(Notify::new());
        let channel = ScriptedChannel {
            events: rx,
            sent: Arc::clone(&sent),
            eof_sent: Arc::clone(&eof_sent),
            fail_sends: false,
        };
        let remote = Remote {
            events: tx,
            sent,
            eof_sent,
        };
        (channel, remote)
    }

    #[async_trait]
    impl ChannelEndpoint for ScriptedChannel {
        async fn recv(&mut self) -> Option<ChannelEvent> {
            self.events.recv().await
        }

        async fn send(&mut self, data: &[u8]) -> Result<()> {
            if self.fail_sends {
                anyhow::bail!("channel write refused");
            }
            self.sent.lock().unwrap().data.extend_from_slice(data);
            Ok(())
        }

        async fn send_eof(&mut self) -> Result<()> {
            self.sent.lock().unwrap().eof = true;
            self.eof_sent.notify_one();
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.sent.lock().unwrap().closed = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reply_arrives_after_client_half_close() {
        let (client, server) = tokio::io::duplex(1024);
        let (channel, remote) = scripted_channel();
        let tunnel = tokio::spawn(Tunnel::run(server, channel, CancellationToken::new(), None));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        client_write.shutdown().await.unwrap();
        remote.eof_sent.notified().await;

        remote
            .events
            .send(ChannelEvent::Data(b"HTTP/1.0 200 OK\r\n\r\nhello".to_vec()))
            .unwrap();
        remote.events.send(ChannelEvent::Eof).unwrap();

        let mut reply = Vec::new();
        client_read.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"HTTP/1.0 200 OK\r\n\r\nhello");

        let stats = tunnel.await.unwrap().unwrap();
        assert_eq!(stats.bytes_local_to_remote, 18);
        assert_eq!(stats.bytes_remote_to_local, 24);
        let sent = remote.sent.lock().unwrap();
        assert_eq!(sent.data, b"GET / HTTP/1.0\r\n\r\n");
        assert!(sent.eof);
        assert!(sent.closed);
    }

    #[tokio::test]
    async fn test_local_data_flows_after_channel_eof() {
        let (client, server) = tokio::io::duplex(1024);
        let (channel, remote) = scripted_channel();
        let tunnel = tokio::spawn(Tunnel::run(server, channel, CancellationToken::new(), None));

        remote
            .events
            .send(ChannelEvent::Data(b"request".to_vec()))
            .unwrap();
        remote.events.send(ChannelEvent::Eof).unwrap();

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let mut request = Vec::new();
        client_read.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");

        client_write.write_all(b"response").await.unwrap();
        client_write.shutdown().await.unwrap();

        let stats = tunnel.await.unwrap().unwrap();
        assert_eq!(stats.total_bytes(), 15);
        let sent = remote.sent.lock().unwrap();
        assert_eq!(sent.data, b"response");
        assert!(sent.eof);
        assert!(sent.closed);
    }

    #[tokio::test]
    async fn test_channel_close_ends_tunnel() {
        let (client, server) = tokio::io::duplex(1024);
        let (channel, remote) = scripted_channel();
        let tunnel = tokio::spawn(Tunnel::run(server, channel, CancellationToken::new(), None));

        remote.events.send(ChannelEvent::Closed).unwrap();
        tunnel.await.unwrap().unwrap();

        let (mut client_read, _client_write) = tokio::io::split(client);
        let mut rest = Vec::new();
        client_read.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        let sent = remote.sent.lock().unwrap();
        assert!(sent.eof);
        assert!(sent.closed);
    }

    #[tokio::test]
    async fn test_channel_write_error_still_closes_channel() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (mut channel, remote) = scripted_channel();
        channel.fail_sends = true;
        let tunnel = tokio::spawn(Tunnel::run(server, channel, CancellationToken::new(), None));

        client.write_all(b"data").await.unwrap();
        let result = tunnel.await.unwrap();
        assert!(result.is_err());

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        let sent = remote.sent.lock().unwrap();
        assert!(sent.data.is_empty());
        assert!(sent.eof);
        assert!(sent.closed);
    }

    #[tokio::test]
    async fn test_cancellation_ends_tunnel() {
        let (_client, server) = tokio::io::duplex(1024);
        let (channel, remote) = scripted_channel();
        let cancel_token = CancellationToken::new();
        let tunnel = tokio::spawn(Tunnel::run(server, channel, cancel_token.clone(), None));

        cancel_token.cancel();
        let stats = tunnel.await.unwrap().unwrap();
        assert_eq!(stats.total_bytes(), 0);
        assert!(remote.sent.lock().unwrap().closed);
    }
}

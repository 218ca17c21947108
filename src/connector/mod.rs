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

//! End-to-end connection flow.
//!
//! A run connects, authenticates, then either starts the configured forwards
//! and holds the session open with a keepalive command (forward mode) or runs
//! the requested command (command mode). The session is always disconnected
//! once authenticated, whatever the outcome.

pub mod command;
pub mod seed;

use anyhow::{Context, Result};
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::forwarding::ForwardManager;
use crate::ssh::{RemoteSession, SessionConnector, SessionTransport};

pub use crate::config::RunMode;
pub use command::{CommandSession, DrainedOutput, OutputLines, SessionOutcome, DISPATCH_FAILED};
pub use seed::{RandomSeed, SeedSource};

/// Command that keeps the session alive in forward mode
pub const KEEPALIVE_COMMAND: &str = "ping localhost -t";

/// Reason sent with the disconnect message
pub const DISCONNECT_REASON: &str = "User disconnects";

pub struct ConnectionOrchestrator<C: SessionConnector> {
    connector: C,
    config: ConnectionConfig,
}

impl<C: SessionConnector> ConnectionOrchestrator<C> {
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self { connector, config }
    }

    /// Perform one run and return the exit status of the remote command.
    ///
    /// Forward mode echoes the keepalive output to `stdout`; command mode
    /// only drains it. Connection, authentication and remote forward failures
    /// are returned as errors.
    pub async fn run<W>(&self, stdout: &mut W) -> Result<i32>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let config = &self.config;

        let seed = RandomSeed::gather().await;
        debug!("Random seed gathered from {}", seed.source());

        info!(
            "Connecting to {}:{} as {}",
            config.host, config.port, config.username
        );
        let transport = self
            .connector
            .open(&config.host, config.port, &seed)
            .await
            .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;

        let session = transport
            .authenticate(&config.username, config.password())
            .await
            .with_context(|| {
                format!(
                    "Authentication failed for {}@{}",
                    config.username, config.host
                )
            })?;
        info!("Authenticated as {}", config.username);

        let result = self.drive(&session, stdout).await;

        if let Err(e) = session.disconnect(DISCONNECT_REASON).await {
            warn!("Failed to disconnect cleanly: {}", e);
        }
        result
    }

    async fn drive<S, W>(&self, session: &S, stdout: &mut W) -> Result<i32>
    where
        S: RemoteSession,
        W: AsyncWrite + Unpin + Send,
    {
        let (command_line, echo) = match self.config.run_mode() {
            RunMode::Forward => {
                let summary = ForwardManager::new(session, &self.config)
                    .start_all()
                    .await?;
                info!(
                    "Forwarding: {} local started, {} local failed, {} remote started",
                    summary.local_started, summary.local_failed, summary.remote_started
                );
                (KEEPALIVE_COMMAND, Some(stdout))
            }
            RunMode::Command(command) => {
                info!("Running command: {}", command);
                (command, None)
            }
        };

        let mut command = CommandSession::new(session.console());
        let status = command
            .run(command_line, &self.config.environment, echo)
            .await;
        info!("Remote command exited with status {}", status);
        Ok(status)
    }
}

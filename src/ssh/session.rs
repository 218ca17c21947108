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

//! Collaborator traits for the SSH session.
//!
//! The connector drives a session through three stages, each represented by
//! its own type so that an operation can only be reached once the previous
//! stage succeeded:
//!
//! ```text
//! SessionConnector::open ─► SessionTransport::authenticate ─► RemoteSession
//!                                                               ├─ register_local_forward
//!                                                               ├─ register_remote_forward
//!                                                               ├─ console ─► RemoteConsole
//!                                                               └─ disconnect
//! ```
//!
//! [`crate::ssh::RusshConnector`] implements these traits over russh. Tests
//! supply in-memory doubles.

use async_trait::async_trait;
use tokio::io::DuplexStream;

use super::Error;
use crate::connector::seed::RandomSeed;
use crate::forwarding::filter::StreamFilter;

/// Write side of the in-memory pipe that receives merged command output.
pub type OutputWriter = DuplexStream;

/// Opens the transport to a remote server.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Transport: SessionTransport;

    /// Connect to `host:port` and complete the key exchange.
    ///
    /// `seed` is advisory: the russh-backed connector draws key exchange
    /// randomness from its own generator and only records the seed's source.
    async fn open(&self, host: &str, port: u16, seed: &RandomSeed)
        -> Result<Self::Transport, Error>;
}

/// A connected but unauthenticated transport.
#[async_trait]
pub trait SessionTransport: Send {
    type Session: RemoteSession;

    /// Authenticate with username and password, consuming the transport.
    async fn authenticate(self, username: &str, password: &str) -> Result<Self::Session, Error>;
}

/// An authenticated session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    type Console: RemoteConsole;

    /// Start listening on `bind_host:bind_port`; every accepted connection is
    /// tunnelled to `dest_host:dest_port` from the server side.
    ///
    /// Returns once the listener is bound; connections are served in the
    /// background until the session disconnects.
    async fn register_local_forward(
        &self,
        bind_host: &str,
        bind_port: u16,
        dest_host: &str,
        dest_port: u16,
        filter: Option<StreamFilter>,
    ) -> Result<(), Error>;

    /// Ask the server to listen on `bind_host:bind_port` and relay every
    /// connection it accepts to `dest_host:dest_port` on this side.
    async fn register_remote_forward(
        &self,
        bind_host: &str,
        bind_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<(), Error>;

    /// Create the remote command capability for this session.
    fn console(&self) -> Self::Console;

    /// Close the session, stopping every forward it owns.
    async fn disconnect(&self, reason: &str) -> Result<(), Error>;
}

/// Runs a single remote command.
#[async_trait]
pub trait RemoteConsole: Send {
    /// Dispatch `command_line`, streaming stdout and stderr merged into
    /// `output`. The writer is dropped once the remote side stops producing
    /// output.
    ///
    /// Returns `false` when the command could not be dispatched.
    async fn command(
        &mut self,
        command_line: &str,
        environment: &[(String, String)],
        output: OutputWriter,
    ) -> bool;

    /// Exit status of the dispatched command, or `-1` when none was reported.
    async fn wait_for_exit_status(&mut self) -> i32;
}

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

//! In-memory session doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

use sshconnect::config::{ConnectionConfig, Properties};
use sshconnect::connector::RandomSeed;
use sshconnect::forwarding::StreamFilter;
use sshconnect::ssh::{
    Error, OutputWriter, RemoteConsole, RemoteSession, SessionConnector, SessionTransport,
};

/// One observed collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open {
        host: String,
        port: u16,
    },
    Authenticate {
        username: String,
        password: String,
    },
    LocalForward {
        bind_host: String,
        bind_port: u16,
        dest_host: String,
        dest_port: u16,
        filter: Option<StreamFilter>,
    },
    RemoteForward {
        bind_host: String,
        bind_port: u16,
        dest_host: String,
        dest_port: u16,
    },
    Command {
        command_line: String,
        environment: Vec<(String, String)>,
    },
    /// Exit status requested; records whether the output pipe was closed
    ExitStatus {
        output_closed: bool,
    },
    Disconnect(String),
}

/// Behaviour of the mock server
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub refuse_connection: bool,
    pub reject_password: bool,
    pub failing_local_ports: Vec<u16>,
    pub failing_remote_ports: Vec<u16>,
    pub reject_command: bool,
    pub output: Vec<u8>,
    pub exit_status: i32,
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Command { command_line, .. } => Some(command_line),
                _ => None,
            })
            .collect()
    }

    pub fn local_forwards(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::LocalForward { .. }))
            .collect()
    }

    pub fn remote_forwards(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::RemoteForward { .. }))
            .collect()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Disconnect(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }
}

pub struct MockConnector {
    script: Script,
    log: CallLog,
}

impl MockConnector {
    pub fn new(script: Script) -> (Self, CallLog) {
        let log = CallLog::default();
        (
            Self {
                script,
                log: log.clone(),
            },
            log,
        )
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    type Transport = MockTransport;

    async fn open(&self, host: &str, port: u16, seed: &RandomSeed) -> Result<MockTransport, Error> {
        assert_eq!(seed.as_bytes().len(), 20);
        self.log.push(Call::Open {
            host: host.to_string(),
            port,
        });
        if self.script.refuse_connection {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(MockTransport {
            script: self.script.clone(),
            log: self.log.clone(),
        })
    }
}

pub struct MockTransport {
    script: Script,
    log: CallLog,
}

#[async_trait]
impl SessionTransport for MockTransport {
    type Session = MockSession;

    async fn authenticate(self, username: &str, password: &str) -> Result<MockSession, Error> {
        self.log.push(Call::Authenticate {
            username: username.to_string(),
            password: password.to_string(),
        });
        if self.script.reject_password {
            return Err(Error::PasswordWrong(username.to_string()));
        }
        Ok(MockSession {
            script: self.script,
            log: self.log,
        })
    }
}

pub struct MockSession {
    script: Script,
    log: CallLog,
}

#[async_trait]
impl RemoteSession for MockSession {
    type Console = MockConsole;

    async fn register_local_forward(
        &self,
        bind_host: &str,
        bind_port: u16,
        dest_host: &str,
        dest_port: u16,
        filter: Option<StreamFilter>,
    ) -> Result<(), Error> {
        self.log.push(Call::LocalForward {
            bind_host: bind_host.to_string(),
            bind_port,
            dest_host: dest_host.to_string(),
            dest_port,
            filter,
        });
        if self.script.failing_local_ports.contains(&bind_port) {
            return Err(Error::LocalBind {
                address: format!("{bind_host}:{bind_port}"),
                source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
            });
        }
        Ok(())
    }

    async fn register_remote_forward(
        &self,
        bind_host: &str,
        bind_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<(), Error> {
        self.log.push(Call::RemoteForward {
            bind_host: bind_host.to_string(),
            bind_port,
            dest_host: dest_host.to_string(),
            dest_port,
        });
        if self.script.failing_remote_ports.contains(&bind_port) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "tcpip-forward refused",
            )));
        }
        Ok(())
    }

    fn console(&self) -> MockConsole {
        MockConsole {
            script: self.script.clone(),
            log: self.log.clone(),
            output_closed: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn disconnect(&self, reason: &str) -> Result<(), Error> {
        self.log.push(Call::Disconnect(reason.to_string()));
        Ok(())
    }
}

pub struct MockConsole {
    script: Script,
    log: CallLog,
    output_closed: Arc<AtomicBool>,
}

#[async_trait]
impl RemoteConsole for MockConsole {
    async fn command(
        &mut self,
        command_line: &str,
        environment: &[(String, String)],
        mut output: OutputWriter,
    ) -> bool {
        self.log.push(Call::Command {
            command_line: command_line.to_string(),
            environment: environment.to_vec(),
        });
        if self.script.reject_command {
            return false;
        }

        let data = std::mem::take(&mut self.script.output);
        let closed = Arc::clone(&self.output_closed);
        tokio::spawn(async move {
            for chunk in data.chunks(8192) {
                if output.write_all(chunk).await.is_err() {
                    break;
                }
            }
            closed.store(true, Ordering::SeqCst);
            drop(output);
        });
        true
    }

    async fn wait_for_exit_status(&mut self) -> i32 {
        self.log.push(Call::ExitStatus {
            output_closed: self.output_closed.load(Ordering::SeqCst),
        });
        self.script.exit_status
    }
}

/// Build a configuration from literal properties.
pub fn config(entries: &[(&str, &str)], command: Option<&str>) -> ConnectionConfig {
    let properties: Properties = entries.iter().copied().collect();
    ConnectionConfig::from_properties(properties, command.map(str::to_string))
}

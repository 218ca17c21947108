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

//! Remote command execution over an exec channel.

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::client::SharedHandle;
use super::session::{OutputWriter, RemoteConsole};
use super::Error;

/// How the remote command ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum ExitReport {
    Status(u32),
    Signal(String),
}

/// Remote command capability of a russh session.
pub struct RemoteCommand {
    connection_handle: SharedHandle,
    exit_report: Option<oneshot::Receiver<Option<ExitReport>>>,
}

impl RemoteCommand {
    pub(crate) fn new(connection_handle: SharedHandle) -> Self {
        Self {
            connection_handle,
            exit_report: None,
        }
    }

    async fn dispatch(
        &self,
        command_line: &str,
        environment: &[(String, String)],
        output: OutputWriter,
    ) -> Result<oneshot::Receiver<Option<ExitReport>>, Error> {
        let mut channel = self
            .connection_handle
            .lock()
            .await
            .channel_open_session()
            .await?;
        for (name, value) in environment {
            // No reply is requested, so a server that rejects the variable
            // goes unnoticed; only a failure to send the request aborts.
            channel.set_env(false, name.as_str(), value.as_str()).await?;
        }
        channel.exec(true, command_line).await?;

        // Output or even the exit status may overtake the exec reply.
        let mut early_output = Vec::new();
        let mut early_exit = None;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => break,
                Some(ChannelMsg::Failure) | None => {
                    return Err(Error::CommandRejected(command_line.to_string()))
                }
                Some(ChannelMsg::Data { ref data })
                | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    early_output.extend_from_slice(data)
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    early_exit = Some(ExitReport::Status(exit_status))
                }
                Some(other) => trace!("Ignoring message before exec reply: {:?}", other),
            }
        }

        let (report_tx, report_rx) = oneshot::channel();
        tokio::spawn(pump_output(
            channel,
            output,
            early_output,
            early_exit,
            report_tx,
        ));
        Ok(report_rx)
    }
}

#[async_trait]
impl RemoteConsole for RemoteCommand {
    async fn command(
        &mut self,
        command_line: &str,
        environment: &[(String, String)],
        output: OutputWriter,
    ) -> bool {
        match self.dispatch(command_line, environment, output).await {
            Ok(report) => {
                self.exit_report = Some(report);
                true
            }
            Err(e) => {
                warn!("Failed to dispatch '{}': {}", command_line, e);
                false
            }
        }
    }

    async fn wait_for_exit_status(&mut self) -> i32 {
        let Some(report) = self.exit_report.take() else {
            return -1;
        };
        match report.await {
            Ok(Some(ExitReport::Status(status))) => status as i32,
            Ok(Some(ExitReport::Signal(signal))) => {
                warn!("Remote command terminated by signal {}", signal);
                -1
            }
            Ok(None) | Err(_) => {
                debug!("Remote command ended without reporting an exit status");
                -1
            }
        }
    }
}

/// Copy channel output into the pipe until the channel closes.
///
/// Writes block while the pipe is full, which in turn stops draining the
/// channel and lets SSH window flow control throttle the remote side.
async fn pump_output(
    mut channel: Channel<Msg>,
    mut output: OutputWriter,
    early_output: Vec<u8>,
    mut exit: Option<ExitReport>,
    report: oneshot::Sender<Option<ExitReport>>,
) {
    let mut reader_attached = true;
    if !early_output.is_empty() && output.write_all(&early_output).await.is_err() {
        reader_attached = false;
    }

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                if reader_attached && output.write_all(data).await.is_err() {
                    debug!("Output reader went away, discarding remaining output");
                    reader_attached = false;
                }
            }
            // Data may still follow the exit status
            ChannelMsg::ExitStatus { exit_status } => exit = Some(ExitReport::Status(exit_status)),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                exit = Some(ExitReport::Signal(format!("{signal_name:?}")))
            }
            ChannelMsg::Eof => trace!("Remote command closed its output"),
            _ => {}
        }
    }

    // Closing the writer is what lets the reader observe end-of-stream
    drop(output);
    let _ = report.send(exit);
}

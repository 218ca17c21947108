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

//! Single remote command execution with merged output.
//!
//! Standard output and standard error of the remote command are written into
//! one bounded in-memory pipe. The pipe is read line by line until the
//! producer closes it, and only then is the exit status requested. Reading to
//! end-of-stream first keeps a chatty command from blocking on a full pipe
//! while the caller waits for it to exit.

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tracing::{debug, error, warn};

use crate::ssh::RemoteConsole;

/// Capacity of the merged output pipe in bytes
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Exit status reported when the command could not be dispatched
pub const DISPATCH_FAILED: i32 = -1;

/// Lines read from the merged output pipe.
///
/// A line ends at `\n`, `\r` or `\r\n`.
pub struct OutputLines {
    reader: BufReader<DuplexStream>,
    line: Vec<u8>,
    // Previous line ended at a `\r`; a `\n` right after it belongs to it
    skip_lf: bool,
}

impl OutputLines {
    fn new(pipe: DuplexStream) -> Self {
        Self {
            reader: BufReader::new(pipe),
            line: Vec::new(),
            skip_lf: false,
        }
    }

    /// Next line without its terminator, `None` at end-of-stream.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than rejected.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.line.clear();
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.line.is_empty() {
                    return Ok(None);
                }
                break;
            }

            let mut start = 0;
            if self.skip_lf {
                self.skip_lf = false;
                if available[0] == b'\n' {
                    start = 1;
                }
            }
            let rest = &available[start..];
            match rest.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(pos) => {
                    self.line.extend_from_slice(&rest[..pos]);
                    self.skip_lf = rest[pos] == b'\r';
                    self.reader.consume(start + pos + 1);
                    break;
                }
                None => {
                    self.line.extend_from_slice(rest);
                    let used = available.len();
                    self.reader.consume(used);
                }
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.line).into_owned()))
    }

    /// Read every remaining line, echoing each one to `echo` if given.
    ///
    /// A failing echo sink stops echoing but not draining.
    pub async fn drain<W>(mut self, mut echo: Option<&mut W>) -> DrainedOutput
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut lines = 0;
        loop {
            match self.next_line().await {
                Ok(Some(line)) => {
                    lines += 1;
                    if let Some(out) = echo.as_deref_mut() {
                        if let Err(e) = write_line(out, &line).await {
                            warn!("Failed to echo command output: {}", e);
                            echo = None;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read command output: {}", e);
                    break;
                }
            }
        }
        DrainedOutput { lines }
    }
}

async fn write_line<W>(out: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

/// Marker that the output pipe has been read to end-of-stream.
///
/// Only [`OutputLines::drain`] produces one, and [`CommandSession::exit_status`]
/// requires one.
#[derive(Debug)]
pub struct DrainedOutput {
    lines: u64,
}

impl DrainedOutput {
    pub fn lines(&self) -> u64 {
        self.lines
    }
}

/// Result of dispatching a command
pub enum SessionOutcome {
    NotDispatched,
    Dispatched(OutputLines),
}

impl SessionOutcome {
    pub fn dispatched(&self) -> bool {
        matches!(self, SessionOutcome::Dispatched(_))
    }
}

/// Runs one command on a remote console.
pub struct CommandSession<C: RemoteConsole> {
    console: C,
}

impl<C: RemoteConsole> CommandSession<C> {
    pub fn new(console: C) -> Self {
        Self { console }
    }

    pub async fn dispatch(
        &mut self,
        command_line: &str,
        environment: &[(String, String)],
    ) -> SessionOutcome {
        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        if self.console.command(command_line, environment, writer).await {
            debug!("Dispatched remote command: {}", command_line);
            SessionOutcome::Dispatched(OutputLines::new(reader))
        } else {
            error!("Failed to run remote command: {}", command_line);
            SessionOutcome::NotDispatched
        }
    }

    pub async fn exit_status(&mut self, drained: DrainedOutput) -> i32 {
        debug!("Command output drained after {} lines", drained.lines());
        self.console.wait_for_exit_status().await
    }

    /// Dispatch, drain and collect the exit status.
    ///
    /// Returns [`DISPATCH_FAILED`] when the command never started.
    pub async fn run<W>(
        &mut self,
        command_line: &str,
        environment: &[(String, String)],
        echo: Option<&mut W>,
    ) -> i32
    where
        W: AsyncWrite + Unpin + Send,
    {
        match self.dispatch(command_line, environment).await {
            SessionOutcome::NotDispatched => DISPATCH_FAILED,
            SessionOutcome::Dispatched(lines) => {
                let drained = lines.drain(echo).await;
                self.exit_status(drained).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::OutputWriter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Console that writes canned output and records when the pipe closed.
    struct ScriptedConsole {
        accept: bool,
        output: Vec<u8>,
        status: i32,
        closed: Arc<AtomicBool>,
        status_requested: Arc<AtomicBool>,
    }

    impl ScriptedConsole {
        fn new(output: impl Into<Vec<u8>>, status: i32) -> Self {
            Self {
                accept: true,
                output: output.into(),
                status,
                closed: Arc::new(AtomicBool::new(false)),
                status_requested: Arc::new(AtomicBool::new(false)),
            }
        }

        fn rejecting() -> Self {
            Self {
                accept: false,
                ..Self::new(Vec::new(), 0)
            }
        }
    }

    #[async_trait]
    impl RemoteConsole for ScriptedConsole {
        async fn command(
            &mut self,
            _command_line: &str,
            _environment: &[(String, String)],
            mut output: OutputWriter,
        ) -> bool {
            if !self.accept {
                return false;
            }
            let data = std::mem::take(&mut self.output);
            let closed = Arc::clone(&self.closed);
            tokio::spawn(async move {
                for chunk in data.chunks(4096) {
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
            self.status_requested.store(true, Ordering::SeqCst);
            assert!(
                self.closed.load(Ordering::SeqCst),
                "exit status requested before output was drained"
            );
            self.status
        }
    }

    #[tokio::test]
    async fn test_run_echoes_lines_and_returns_status() {
        let console = ScriptedConsole::new("one\r\ntwo\nthree", 3);
        let mut session = CommandSession::new(console);
        let mut echoed: Vec<u8> = Vec::new();

        let status = session.run("cmd", &[], Some(&mut echoed)).await;
        assert_eq!(status, 3);
        assert_eq!(String::from_utf8(echoed).unwrap(), "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_output_larger_than_pipe_is_fully_drained() {
        let line = "x".repeat(99) + "\n";
        let output = line.repeat(PIPE_CAPACITY / 100 * 4);
        let expected_lines = (PIPE_CAPACITY / 100 * 4) as u64;
        let mut session = CommandSession::new(ScriptedConsole::new(output, 0));

        let SessionOutcome::Dispatched(lines) = session.dispatch("cmd", &[]).await else {
            panic!("command should dispatch");
        };
        let drained = lines.drain(None::<&mut Vec<u8>>).await;
        assert_eq!(drained.lines(), expected_lines);
        assert_eq!(session.exit_status(drained).await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_returns_sentinel() {
        let console = ScriptedConsole::rejecting();
        let status_requested = Arc::clone(&console.status_requested);
        let mut session = CommandSession::new(console);
        let mut echoed: Vec<u8> = Vec::new();

        assert!(!session.dispatch("cmd", &[]).await.dispatched());
        let status = session.run("cmd", &[], Some(&mut echoed)).await;
        assert_eq!(status, DISPATCH_FAILED);
        assert!(echoed.is_empty());
        assert!(!status_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lines_end_at_any_terminator() {
        let mut session = CommandSession::new(ScriptedConsole::new("a\rb\r\nc\n\r\nd", 0));
        let SessionOutcome::Dispatched(mut lines) = session.dispatch("cmd", &[]).await else {
            panic!("command should dispatch");
        };

        let mut seen = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            seen.push(line);
        }
        assert_eq!(seen, vec!["a", "b", "c", "", "d"]);
    }

    #[tokio::test]
    async fn test_crlf_split_across_reads_is_one_terminator() {
        let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let mut lines = OutputLines::new(reader);

        writer.write_all(b"first\r").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("first"));

        writer.write_all(b"\nsecond\r\r").await.unwrap();
        drop(writer);
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let mut session = CommandSession::new(ScriptedConsole::new(b"ok \xff\n".to_vec(), 0));
        let SessionOutcome::Dispatched(mut lines) = session.dispatch("cmd", &[]).await else {
            panic!("command should dispatch");
        };
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ok \u{fffd}"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}

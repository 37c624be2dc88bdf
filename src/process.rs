//! Decoder subprocess ownership.
//!
//! A [`DecoderProcess`] holds the child together with both pipe ends. Every way
//! out (quit handshake, forced kill, reaping an already exited child) funnels
//! through the methods here so the drain/terminate/wait logic lives in one place.

use crate::error::{Result, StreamError};
use crate::frame::SharedPipe;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle as TokioJoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_PROGRAM: &str = "ffmpeg";
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte the decoder reads on stdin as a request to finish and exit.
pub const QUIT_SIGNAL: &[u8] = b"q";

/// Executable plus arguments placed before the generated decoder arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderCommand {
    pub program: String,
    #[serde(default)]
    pub leading_args: Vec<String>,
}

impl DecoderCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn leading_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }
}

impl Default for DecoderCommand {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

/// What happens to the decoder's standard error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrPolicy {
    #[default]
    Discard,
    Inherit,
    /// Forward each line to `tracing` at debug level.
    Log,
}

impl StderrPolicy {
    fn stdio(&self) -> Stdio {
        match self {
            StderrPolicy::Discard => Stdio::null(),
            StderrPolicy::Inherit => Stdio::inherit(),
            StderrPolicy::Log => Stdio::piped(),
        }
    }
}

/// How a decoder process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopOutcome {
    /// The decoder acknowledged the quit signal and exited by itself.
    Graceful { code: Option<i32> },
    /// The decoder had already exited; it was drained and reaped.
    Exited { code: Option<i32> },
    /// The decoder was killed.
    Forced,
}

#[derive(Debug)]
pub struct DecoderProcess {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: SharedPipe<ChildStdout>,
    cancel: CancellationToken,
    stderr_task: Option<TokioJoinHandle<()>>,
}

impl DecoderProcess {
    /// Spawn the decoder with stdin and stdout piped.
    ///
    /// The child is killed if this handle is dropped without being stopped.
    pub async fn start(
        command: &DecoderCommand,
        arguments: &[String],
        stderr: StderrPolicy,
    ) -> Result<Self> {
        let spawn_error = |source: io::Error| StreamError::Spawn {
            program: command.program.clone(),
            source,
        };

        let mut child = Command::new(&command.program)
            .args(&command.leading_args)
            .args(arguments)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr.stdio())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("decoder stdout was not captured")))?;

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(pid, stderr)));

        info!(?pid, program = %command.program, "Decoder started");

        Ok(Self {
            child,
            pid,
            stdin,
            stdout: Arc::new(TokioMutex::new(Some(stdout))),
            cancel: CancellationToken::new(),
            stderr_task,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the decoder has already exited, without blocking.
    pub fn try_status(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Output pipe shared with frame readers.
    pub(crate) fn stdout(&self) -> SharedPipe<ChildStdout> {
        self.stdout.clone()
    }

    /// Token cancelled as soon as any stop begins.
    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Send the quit signal, drain stdout to end-of-stream, and wait for exit.
    ///
    /// The drain and wait are bounded by `timeout`; past it the decoder is killed.
    /// Forwarding of stderr shares the same deadline.
    pub async fn stop_graceful(mut self, timeout: Duration) -> Result<StopOutcome> {
        let deadline = Instant::now() + timeout;
        match self.shutdown(deadline, true).await {
            Some(Ok(status)) => {
                info!(pid = ?self.pid, code = ?status.code(), "Decoder stopped gracefully");
                self.finish_stderr(deadline).await;
                Ok(StopOutcome::Graceful {
                    code: status.code(),
                })
            }
            Some(Err(error)) => {
                warn!(pid = ?self.pid, ?error, "Waiting for decoder failed, killing it");
                self.stop_forced().await
            }
            None => {
                warn!(pid = ?self.pid, ?timeout, "Decoder ignored quit signal, killing it");
                self.stop_forced().await
            }
        }
    }

    /// Kill the decoder and wait for it. A decoder that already exited is only reaped.
    pub async fn stop_forced(mut self) -> Result<StopOutcome> {
        self.cancel.cancel();
        self.stdin.take();
        self.abort_stderr();

        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(pid = ?self.pid, code = ?status.code(), "Decoder already exited");
            return Ok(StopOutcome::Exited {
                code: status.code(),
            });
        }

        self.child.kill().await.map_err(StreamError::Stop)?;
        info!(pid = ?self.pid, "Decoder killed");
        Ok(StopOutcome::Forced)
    }

    /// Release the decoder the cheapest safe way for its current state.
    ///
    /// A running decoder gets the graceful stop. One that exited cleanly has its
    /// remaining output drained and is reaped; one that failed is reaped directly.
    pub async fn close(mut self, timeout: Duration) -> Result<StopOutcome> {
        let deadline = Instant::now() + timeout;
        match self.child.try_wait() {
            Ok(None) => self.stop_graceful(timeout).await,
            Ok(Some(status)) if status.success() => match self.shutdown(deadline, false).await {
                Some(Ok(status)) => {
                    self.finish_stderr(deadline).await;
                    Ok(StopOutcome::Exited {
                        code: status.code(),
                    })
                }
                _ => self.stop_forced().await,
            },
            Ok(Some(status)) => {
                warn!(pid = ?self.pid, code = ?status.code(), "Decoder exited abnormally");
                self.stop_forced().await
            }
            Err(error) => {
                warn!(pid = ?self.pid, ?error, "Failed to query decoder state");
                self.stop_forced().await
            }
        }
    }

    /// Returns `None` when `deadline` passed first.
    async fn shutdown(
        &mut self,
        deadline: Instant,
        send_quit: bool,
    ) -> Option<io::Result<ExitStatus>> {
        self.cancel.cancel();
        let pid = self.pid;
        let stdin = self.stdin.take();
        let stdout = self.stdout.clone();
        let child = &mut self.child;

        let sequence = async move {
            if let Some(mut stdin) = stdin {
                if send_quit {
                    debug!(?pid, "Sending quit signal");
                    if let Err(error) = write_quit(&mut stdin).await {
                        // Broken pipe when the decoder is already gone
                        debug!(?pid, ?error, "Failed to send quit signal");
                    }
                }
            }

            // Unblocks a decoder stuck writing to a full pipe
            if let Some(mut stdout) = stdout.lock().await.take() {
                match tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await {
                    Ok(drained) => debug!(?pid, drained, "Drained decoder output"),
                    Err(error) => debug!(?pid, ?error, "Draining decoder output failed"),
                }
            }

            child.wait().await
        };

        tokio::time::timeout_at(deadline, sequence).await.ok()
    }

    /// Let the stderr forwarder flush until `deadline`, then drop it. Something
    /// other than the decoder (a leftover child) may hold stderr open.
    async fn finish_stderr(&mut self, deadline: Instant) {
        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                debug!(pid = ?self.pid, "Decoder stderr still open, stop forwarding");
                task.abort();
            }
        }
    }

    fn abort_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

async fn write_quit(stdin: &mut ChildStdin) -> io::Result<()> {
    stdin.write_all(QUIT_SIGNAL).await?;
    stdin.flush().await
}

async fn forward_stderr(pid: Option<u32>, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(?pid, "{line}"),
            Ok(None) => break,
            Err(error) => {
                debug!(?pid, ?error, "Decoder stderr closed");
                break;
            }
        }
    }
}

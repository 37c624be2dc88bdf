use crate::command::build_arguments;
use crate::error::{Result, StreamError};
use crate::format::VideoFormat;
use crate::frame::FrameReader;
use crate::process::{
    DEFAULT_GRACEFUL_TIMEOUT, DecoderCommand, DecoderProcess, StderrPolicy, StopOutcome,
};
use crate::source::Source;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

/// How the decoder is launched and how long it gets to quit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    pub decoder: DecoderCommand,
    pub stderr: StderrPolicy,
    pub graceful_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            decoder: DecoderCommand::default(),
            stderr: StderrPolicy::default(),
            graceful_timeout: DEFAULT_GRACEFUL_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Closed = 0,
    Opening = 1,
    Open = 2,
    Closing = 3,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Opening,
            2 => StreamState::Open,
            3 => StreamState::Closing,
            _ => StreamState::Closed,
        }
    }
}

/// A decoder fed from `source`, producing frames of `format`.
///
/// At most one decoder runs per stream. `open` and `close` are serialized by an
/// internal lock; `frames` readers are not, and end as soon as a close begins.
#[derive(Debug)]
pub struct VideoStream {
    source: Source,
    format: VideoFormat,
    filter: Option<String>,
    options: StreamOptions,

    process: TokioMutex<Option<DecoderProcess>>,
    state: AtomicU8,
}

impl VideoStream {
    pub fn new(source: impl Into<Source>, format: VideoFormat) -> Self {
        Self {
            source: source.into(),
            format,
            filter: None,
            options: StreamOptions::default(),
            process: TokioMutex::new(None),
            state: AtomicU8::new(StreamState::Closed as u8),
        }
    }

    /// Apply an ffmpeg filter graph (`-vf`) to the decoded video.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Decoder arguments this stream launches with.
    pub fn arguments(&self) -> Vec<String> {
        build_arguments(&self.source, &self.format, self.filter.as_deref())
    }

    /// Start the decoder. Fails with [`StreamError::AlreadyOpen`] if one is running.
    pub async fn open(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Err(StreamError::AlreadyOpen);
        }

        self.set_state(StreamState::Opening);
        let arguments = self.arguments();
        info!(
            url = %self.source.redacted_url(),
            frame_size = self.format.frame_size(),
            "Opening stream"
        );

        match DecoderProcess::start(&self.options.decoder, &arguments, self.options.stderr).await {
            Ok(started) => {
                *process = Some(started);
                self.set_state(StreamState::Open);
                Ok(())
            }
            Err(error) => {
                warn!(?error, "Failed to open stream");
                self.set_state(StreamState::Closed);
                Err(error)
            }
        }
    }

    /// Reader over the running decoder's output.
    pub async fn frames(&self) -> Result<FrameReader> {
        let process = self.process.lock().await;
        match process.as_ref() {
            Some(process) if self.state() == StreamState::Open => Ok(FrameReader::new(
                process.stdout(),
                process.cancellation(),
                self.format,
            )),
            _ => Err(StreamError::NotOpen),
        }
    }

    /// Whether the decoder of an open stream has already exited on its own.
    pub async fn decoder_exited(&self) -> bool {
        let mut process = self.process.lock().await;
        match process.as_mut() {
            Some(process) => matches!(process.try_status(), Ok(Some(_))),
            None => false,
        }
    }

    /// Stop the decoder if one is running.
    ///
    /// Returns `None` when nothing was open. Ownership of the decoder is released
    /// even when stopping it fails, so `open` is legal again afterwards.
    pub async fn close(&self) -> Result<Option<StopOutcome>> {
        let mut process = self.process.lock().await;
        let Some(owned) = process.take() else {
            debug!("Close on a closed stream");
            return Ok(None);
        };

        self.set_state(StreamState::Closing);
        let pid = owned.pid();
        let result = owned.close(self.options.graceful_timeout).await;
        self.set_state(StreamState::Closed);

        match &result {
            Ok(outcome) => info!(?pid, ?outcome, "Stream closed"),
            Err(error) => warn!(?pid, ?error, "Stream closed, decoder stop failed"),
        }
        result.map(Some)
    }

    /// Open the stream, run `body`, and close it again on the way out.
    ///
    /// The close runs whether `body` returns normally or with an error value; its
    /// own failure is reported only when `body` succeeded.
    pub async fn run<F, T, E>(&self, body: F) -> std::result::Result<T, E>
    where
        F: AsyncFnOnce(&Self) -> std::result::Result<T, E>,
        E: From<StreamError>,
    {
        self.open().await?;
        let result = body(self).await;
        let closed = self.close().await;

        let value = result?;
        closed?;
        Ok(value)
    }
}

use crate::format::VideoFormat;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::ChildStdout;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pipe end shared between the process owner and its readers. The owner takes
/// it out on stop, after which readers observe end-of-stream.
pub type SharedPipe<R> = Arc<TokioMutex<Option<R>>>;

/// One decoded image: `height * width * channels` bytes, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    format: VideoFormat,
}

impl Frame {
    /// Wrap a buffer that holds exactly one frame of `format`.
    pub fn new(data: Bytes, format: VideoFormat) -> Option<Self> {
        (data.len() == format.frame_size()).then_some(Self { data, format })
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn width(&self) -> usize {
        self.format.width() as usize
    }

    pub fn height(&self) -> usize {
        self.format.height() as usize
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// `(height, width, channels)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.format.shape()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Row `y`, `width * channels` bytes.
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        let stride = self.width() * self.channels();
        (y < self.height()).then(|| &self.data[y * stride..(y + 1) * stride])
    }

    /// Channel bytes of the pixel at column `x`, row `y`.
    pub fn pixel(&self, y: usize, x: usize) -> Option<&[u8]> {
        let channels = self.channels();
        if x >= self.width() {
            return None;
        }
        self.row(y)
            .map(|row| &row[x * channels..(x + 1) * channels])
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.width() * self.channels())
    }
}

enum Pull {
    Frame(Bytes),
    Cancelled,
    Closed,
    Failed(std::io::Error),
}

/// Pulls fixed-size frames off a decoder's output pipe.
///
/// The sequence ends, without error, when the pipe closes (even mid-frame), when
/// the owning stream starts closing, or on a read failure. Once ended it stays
/// ended.
///
/// Bytes of a frame that is still arriving are kept in the reader, so dropping a
/// `next_frame` future part way through loses nothing.
pub struct FrameReader<R = ChildStdout> {
    pipe: SharedPipe<R>,
    cancel: CancellationToken,
    format: VideoFormat,
    buffer: BytesMut,
    filled: usize,
    pulled: u64,
    finished: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(pipe: SharedPipe<R>, cancel: CancellationToken, format: VideoFormat) -> Self {
        Self {
            pipe,
            cancel,
            format,
            buffer: BytesMut::new(),
            filled: 0,
            pulled: 0,
            finished: false,
        }
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    /// Frames yielded so far.
    pub fn pulled(&self) -> u64 {
        self.pulled
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read the next whole frame, or `None` once the sequence has ended.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }

        let size = self.format.frame_size();
        if self.buffer.is_empty() {
            self.buffer.resize(size, 0);
        }

        let cancel = self.cancel.clone();
        let pipe = self.pipe.clone();
        let pull = tokio::select! {
            biased;
            _ = cancel.cancelled() => Pull::Cancelled,
            pull = fill_frame(&pipe, &mut self.buffer, &mut self.filled) => pull,
        };

        match pull {
            Pull::Frame(data) => {
                self.pulled += 1;
                match Frame::new(data, self.format) {
                    Some(frame) => return Some(frame),
                    None => warn!(size, "Frame buffer size mismatch"),
                }
            }
            Pull::Cancelled => debug!(pulled = self.pulled, "Frame sequence cancelled"),
            Pull::Closed => debug!(pulled = self.pulled, "Decoder output closed"),
            Pull::Failed(error) => warn!(pulled = self.pulled, ?error, "Reading decoder output failed"),
        }

        self.finished = true;
        None
    }

    /// Turn the reader into a `Stream` of frames.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next_frame().await.map(|frame| (frame, reader))
        })
    }
}

/// Read into `buffer[filled..]` until it holds one whole frame.
///
/// `filled` is advanced after every completed read, so a cancelled call resumes
/// where it stopped.
async fn fill_frame<R>(pipe: &SharedPipe<R>, buffer: &mut BytesMut, filled: &mut usize) -> Pull
where
    R: AsyncRead + Unpin,
{
    let mut guard = pipe.lock().await;
    let Some(reader) = guard.as_mut() else {
        return Pull::Closed;
    };

    while *filled < buffer.len() {
        match reader.read(&mut buffer[*filled..]).await {
            // End-of-stream, possibly mid-frame: decoder shut down
            Ok(0) => return Pull::Closed,
            Ok(read) => *filled += read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Pull::Failed(error),
        }
    }

    *filled = 0;
    Pull::Frame(buffer.split().freeze())
}

pub mod command;
pub mod config;
pub mod error;
pub mod format;
pub mod frame;
pub mod process;
pub mod source;
pub mod stream;

//
// Re-export
//
pub use command::build_arguments;
pub use config::Config;
pub use error::StreamError;
pub use format::{PixelFormat, VideoFormat};
pub use frame::{Frame, FrameReader};
pub use process::{DecoderCommand, DecoderProcess, StderrPolicy, StopOutcome};
pub use source::{Authentication, RtspSource, Source, Transport, build_url};
pub use stream::{StreamOptions, StreamState, VideoStream};

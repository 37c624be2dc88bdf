use std::io;
use thiserror::Error;

/// Errors surfaced by descriptors, the command builder and the stream lifecycle.
///
/// Short reads on the frame pipe and graceful-stop timeouts are not listed here:
/// the first ends the frame sequence, the second falls back to forced termination.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid descriptor: {0}")]
    Construction(String),

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("Failed to spawn decoder {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Stream is already open")]
    AlreadyOpen,

    #[error("Stream is not open")]
    NotOpen,

    #[error("Failed to terminate decoder")]
    Stop(#[source] io::Error),
}

impl StreamError {
    pub(crate) fn construction(message: impl Into<String>) -> Self {
        StreamError::Construction(message.into())
    }

    /// Misordered open/close/frames calls, as opposed to runtime failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, StreamError::AlreadyOpen | StreamError::NotOpen)
    }
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violations() {
        assert!(StreamError::AlreadyOpen.is_contract_violation());
        assert!(StreamError::NotOpen.is_contract_violation());
        assert!(!StreamError::construction("port 0").is_contract_violation());
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        let error = StreamError::Spawn {
            program: "ffmpeg".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(error.to_string(), r#"Failed to spawn decoder "ffmpeg""#);
        assert!(std::error::Error::source(&error).is_some());
    }
}

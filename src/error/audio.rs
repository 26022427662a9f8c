// Audio input error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Error code range: 1001-1004
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Audio file could not be opened or decoded
    pub const DECODE_FAILED: i32 = 1001;

    /// Audio buffer contains no samples
    pub const EMPTY_BUFFER: i32 = 1002;

    /// Sample rate is zero or otherwise unusable
    pub const INVALID_SAMPLE_RATE: i32 = 1003;

    /// Underlying IO failure (writing WAV output, reading stems)
    pub const IO_FAILED: i32 = 1004;
}

/// Log an audio error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=AudioInput, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover loading, validating and writing PCM buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Audio file could not be decoded
    DecodeFailed { reason: String },

    /// Audio buffer has zero samples
    EmptyBuffer,

    /// Sample rate must be greater than zero
    InvalidSampleRate { sample_rate: u32 },

    /// IO failure
    IoFailed { details: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::DecodeFailed { .. } => AudioErrorCodes::DECODE_FAILED,
            AudioError::EmptyBuffer => AudioErrorCodes::EMPTY_BUFFER,
            AudioError::InvalidSampleRate { .. } => AudioErrorCodes::INVALID_SAMPLE_RATE,
            AudioError::IoFailed { .. } => AudioErrorCodes::IO_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::DecodeFailed { reason } => format!("Failed to decode audio: {}", reason),
            AudioError::EmptyBuffer => "Audio buffer contains no samples".to_string(),
            AudioError::InvalidSampleRate { sample_rate } => {
                format!("Sample rate must be greater than 0 (got {})", sample_rate)
            }
            AudioError::IoFailed { details } => format!("IO error: {}", details),
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::IoFailed {
            details: err.to_string(),
        }
    }
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => AudioError::from(io),
            other => AudioError::DecodeFailed {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(
            AudioError::DecodeFailed {
                reason: "bad header".to_string()
            }
            .code(),
            AudioErrorCodes::DECODE_FAILED
        );
        assert_eq!(AudioError::EmptyBuffer.code(), AudioErrorCodes::EMPTY_BUFFER);
        assert_eq!(
            AudioError::InvalidSampleRate { sample_rate: 0 }.code(),
            AudioErrorCodes::INVALID_SAMPLE_RATE
        );
        assert_eq!(
            AudioError::IoFailed {
                details: "disk".to_string()
            }
            .code(),
            AudioErrorCodes::IO_FAILED
        );
    }

    #[test]
    fn test_audio_error_messages() {
        let err = AudioError::InvalidSampleRate { sample_rate: 0 };
        assert_eq!(err.message(), "Sample rate must be greater than 0 (got 0)");

        let err = AudioError::EmptyBuffer;
        assert!(err.message().contains("no samples"));
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::EmptyBuffer;
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("test io error");
        let audio_err: AudioError = io_err.into();
        match audio_err {
            AudioError::IoFailed { details } => {
                assert!(details.contains("test io error"));
            }
            _ => panic!("Expected IoFailed"),
        }
    }
}

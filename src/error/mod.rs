// Error types for the drum chart generator
//
// This module defines custom error types for audio input and chart generation,
// providing structured error handling with numeric codes that callers can
// surface in bug reports and diagnostics exports.

mod audio;
mod generation;
mod isolation;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use generation::{log_generation_error, GenerationError, GenerationErrorCodes};
pub use isolation::IsolationError;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the pipeline boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

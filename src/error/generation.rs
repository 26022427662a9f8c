// Chart generation error types and constants

use crate::error::{AudioError, ErrorCode, IsolationError};
use crate::generation::stage::Stage;
use log::error;
use std::fmt;

/// Generation error code constants
///
/// Error code range: 3001-3007
pub struct GenerationErrorCodes {}

impl GenerationErrorCodes {
    /// Params or audio rejected before the staged pipeline started
    pub const INVALID_INPUT: i32 = 3001;

    /// Stem isolation model could not be loaded
    pub const MODEL_UNAVAILABLE: i32 = 3002;

    /// Stem isolation collaborator failed
    pub const SEPARATION_FAILED: i32 = 3003;

    /// Another run is active on this coordinator
    pub const ALREADY_RUNNING: i32 = 3004;

    /// Stage worker task panicked or was aborted
    pub const STAGE_TASK_FAILED: i32 = 3005;

    /// Stage machine rejected a transition
    pub const INVALID_TRANSITION: i32 = 3006;

    /// Configuration file could not be parsed
    pub const CONFIG_INVALID: i32 = 3007;
}

/// Log a generation error with structured context
pub fn log_generation_error(err: &GenerationError, context: &str) {
    error!(
        "Generation error in {}: code={}, component=GenerationCoordinator, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors that end a generation run as `Failed`
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Params or audio are malformed
    InvalidInput { reason: String },

    /// The stem isolation model is unavailable
    ModelUnavailable { reason: String },

    /// Stem isolation failed
    SeparationFailed { reason: String },

    /// Overlapping run refused
    AlreadyRunning,

    /// Stage worker panicked or was aborted by the runtime
    StageTaskFailed { stage: Stage, details: String },

    /// Stage transition not present in the transition table
    InvalidTransition { from: Stage, to: Stage },

    /// Configuration file could not be parsed
    ConfigInvalid { reason: String },
}

impl GenerationError {
    /// Shorthand used by param validation
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        GenerationError::InvalidInput {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for GenerationError {
    fn code(&self) -> i32 {
        match self {
            GenerationError::InvalidInput { .. } => GenerationErrorCodes::INVALID_INPUT,
            GenerationError::ModelUnavailable { .. } => GenerationErrorCodes::MODEL_UNAVAILABLE,
            GenerationError::SeparationFailed { .. } => GenerationErrorCodes::SEPARATION_FAILED,
            GenerationError::AlreadyRunning => GenerationErrorCodes::ALREADY_RUNNING,
            GenerationError::StageTaskFailed { .. } => GenerationErrorCodes::STAGE_TASK_FAILED,
            GenerationError::InvalidTransition { .. } => GenerationErrorCodes::INVALID_TRANSITION,
            GenerationError::ConfigInvalid { .. } => GenerationErrorCodes::CONFIG_INVALID,
        }
    }

    fn message(&self) -> String {
        match self {
            GenerationError::InvalidInput { reason } => format!("invalid input: {}", reason),
            GenerationError::ModelUnavailable { reason } => {
                format!("stem isolation model unavailable: {}", reason)
            }
            GenerationError::SeparationFailed { reason } => {
                format!("stem isolation failed: {}", reason)
            }
            GenerationError::AlreadyRunning => {
                "a generation run is already active on this coordinator".to_string()
            }
            GenerationError::StageTaskFailed { stage, details } => {
                format!("{} stage aborted: {}", stage.display_name(), details)
            }
            GenerationError::InvalidTransition { from, to } => format!(
                "invalid stage transition {} -> {}",
                from.display_name(),
                to.display_name()
            ),
            GenerationError::ConfigInvalid { reason } => {
                format!("invalid configuration: {}", reason)
            }
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GenerationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for GenerationError {}

impl From<AudioError> for GenerationError {
    fn from(err: AudioError) -> Self {
        GenerationError::InvalidInput {
            reason: err.message(),
        }
    }
}

impl From<IsolationError> for GenerationError {
    fn from(err: IsolationError) -> Self {
        match err {
            IsolationError::ModelUnavailable { reason } => {
                GenerationError::ModelUnavailable { reason }
            }
            IsolationError::Failed { reason } => GenerationError::SeparationFailed { reason },
            IsolationError::Cancelled => GenerationError::SeparationFailed {
                reason: "isolation reported cancellation without a cancelled token".to_string(),
            },
        }
    }
}

// Errors reported by stem isolation collaborators

use std::fmt;

/// Failure modes of a [`StemIsolator`](crate::separation::StemIsolator)
///
/// Collaborators report these; the coordinator converts them into
/// [`GenerationError`](crate::error::GenerationError) at the stage boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationError {
    /// Model weights or runtime could not be loaded
    ModelUnavailable { reason: String },

    /// Separation itself failed
    Failed { reason: String },

    /// The isolator observed the cancellation token and stopped early
    Cancelled,
}

impl fmt::Display for IsolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationError::ModelUnavailable { reason } => {
                write!(f, "model unavailable: {}", reason)
            }
            IsolationError::Failed { reason } => write!(f, "isolation failed: {}", reason),
            IsolationError::Cancelled => write!(f, "isolation cancelled"),
        }
    }
}

impl std::error::Error for IsolationError {}

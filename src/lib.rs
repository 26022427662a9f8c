// Drumchart Core - chart drafts from drum audio
// Onset detection, tempo and grid analysis, lane assignment and a staged,
// cancellable generation coordinator

// Module declarations
pub mod analysis;
pub mod audio;
pub mod chart;
pub mod config;
pub mod debug;
pub mod error;
pub mod generation;
pub mod separation;
pub mod testing;

// Re-exports for convenience
pub use audio::AudioBuffer;
pub use chart::{ChartDraft, HitObject, TimebaseSynchroniser};
pub use config::AppConfig;
pub use error::{ErrorCode, GenerationError};
pub use generation::{
    CancellationToken, GenerationCoordinator, GenerationParams, GenerationProgress,
    GenerationResult,
};
pub use separation::StemIsolator;

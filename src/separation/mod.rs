// Separation module - stem isolation collaborators
//
// Source separation itself happens outside this crate. The pipeline only sees
// the `StemIsolator` capability: load a model, then turn the full mix into a
// percussion-only buffer. Both calls block and may be slow, so the coordinator
// runs them on the blocking pool and passes the run's cancellation token in.

use std::path::{Path, PathBuf};

use crate::audio::wav::read_wav;
use crate::audio::AudioBuffer;
use crate::error::IsolationError;
use crate::generation::cancel::CancellationToken;

/// Full mix in, isolated percussion stem out
pub trait StemIsolator: Send + Sync {
    /// Short identifier for logs and diagnostics
    fn name(&self) -> &str;

    /// Prepare the separation model
    ///
    /// Implementations that can stop early should poll `token` and return
    /// [`IsolationError::Cancelled`].
    fn load_model(&self, token: &CancellationToken) -> Result<(), IsolationError>;

    /// Isolate the percussion stem of `mix`
    fn isolate(
        &self,
        mix: &AudioBuffer,
        token: &CancellationToken,
    ) -> Result<AudioBuffer, IsolationError>;
}

/// Treats the input as already isolated (drum-only recordings)
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughIsolator;

impl StemIsolator for PassthroughIsolator {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn load_model(&self, _token: &CancellationToken) -> Result<(), IsolationError> {
        Ok(())
    }

    fn isolate(
        &self,
        mix: &AudioBuffer,
        token: &CancellationToken,
    ) -> Result<AudioBuffer, IsolationError> {
        token.check().map_err(|_| IsolationError::Cancelled)?;
        Ok(mix.clone())
    }
}

/// Uses a drum stem WAV produced beforehand by an external separation tool
#[derive(Debug, Clone)]
pub struct FileStemIsolator {
    stem_path: PathBuf,
}

impl FileStemIsolator {
    pub fn new(stem_path: impl Into<PathBuf>) -> Self {
        Self {
            stem_path: stem_path.into(),
        }
    }

    pub fn stem_path(&self) -> &Path {
        &self.stem_path
    }
}

impl StemIsolator for FileStemIsolator {
    fn name(&self) -> &str {
        "file_stem"
    }

    fn load_model(&self, _token: &CancellationToken) -> Result<(), IsolationError> {
        if self.stem_path.is_file() {
            Ok(())
        } else {
            Err(IsolationError::ModelUnavailable {
                reason: format!("stem file {} not found", self.stem_path.display()),
            })
        }
    }

    fn isolate(
        &self,
        mix: &AudioBuffer,
        token: &CancellationToken,
    ) -> Result<AudioBuffer, IsolationError> {
        token.check().map_err(|_| IsolationError::Cancelled)?;

        let stem = read_wav(&self.stem_path).map_err(|err| IsolationError::Failed {
            reason: format!("{}: {}", self.stem_path.display(), err),
        })?;
        if stem.sample_rate() != mix.sample_rate() {
            return Err(IsolationError::Failed {
                reason: format!(
                    "stem sample rate {} Hz does not match mix {} Hz",
                    stem.sample_rate(),
                    mix.sample_rate()
                ),
            });
        }
        if stem.len() != mix.len() {
            log::warn!(
                "[FileStemIsolator] Stem length {} differs from mix length {}",
                stem.len(),
                mix.len()
            );
        }

        token.check().map_err(|_| IsolationError::Cancelled)?;
        Ok(stem)
    }
}

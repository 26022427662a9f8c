// Generation module - staged, cancellable chart generation runs
//
// A run takes immutable `GenerationParams`, walks the stage machine from
// audio preparation to finalising and ends in exactly one `GenerationResult`.
// Progress and heartbeats flow through a bounded channel owned by the run.

pub mod cancel;
pub mod coordinator;
pub mod diagnostics;
pub mod progress;
pub mod stage;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::confidence::{ConfidenceAssessment, DetectionStats, IssueTag};
use crate::analysis::lanes::LaneStats;
use crate::analysis::onset::{Envelope, Peak};
use crate::analysis::quantizer::{QuantizationGrid, QuantizedPeak};
use crate::analysis::tempo::TempoEstimate;
use crate::audio::AudioBuffer;
use crate::chart::{ChartDraft, SyncOutcome, TimebaseHints};
use crate::config::GenerationConfig;
use crate::error::{ErrorCode, GenerationError};

pub use cancel::{CancellationToken, Cancelled};
pub use coordinator::{GenerationCoordinator, GenerationHandle, MIN_CHANNEL_CAPACITY};
pub use diagnostics::{LogEntry, LogLevel, RunDiagnostics, RunLog};
pub use progress::{GenerationProgress, StageProgress, StallMonitor, StallStatus};
pub use stage::{CoordinatorState, Stage, StageMachine};

/// Highest accepted sensitivity
pub const MAX_SENSITIVITY: u8 = 100;

/// Caller-side defaults resolved into every new [`GenerationParams`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub sensitivity: u8,
    pub grid: QuantizationGrid,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for GenerationDefaults {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            sensitivity: config.default_sensitivity,
            grid: config.default_grid,
        }
    }
}

/// Immutable input snapshot of one run
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub audio: AudioBuffer,
    /// 0-100, higher admits weaker onsets
    pub sensitivity: u8,
    pub grid: QuantizationGrid,
    pub debug_overlay: bool,
    pub forced_bpm: Option<f64>,
    pub forced_offset_seconds: Option<f64>,
    pub forced_step_seconds: Option<f64>,
}

impl GenerationParams {
    pub fn builder(audio: AudioBuffer, defaults: GenerationDefaults) -> GenerationParamsBuilder {
        GenerationParamsBuilder {
            params: GenerationParams {
                audio,
                sensitivity: defaults.sensitivity,
                grid: defaults.grid,
                debug_overlay: false,
                forced_bpm: None,
                forced_offset_seconds: None,
                forced_step_seconds: None,
            },
        }
    }

    /// Reject malformed params before any stage runs
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.sensitivity > MAX_SENSITIVITY {
            return Err(GenerationError::invalid_input(format!(
                "sensitivity {} out of range 0-{}",
                self.sensitivity, MAX_SENSITIVITY
            )));
        }
        if let Some(bpm) = self.forced_bpm {
            if !(bpm.is_finite() && bpm > 0.0) {
                return Err(GenerationError::invalid_input(format!(
                    "forced BPM {} must be finite and positive",
                    bpm
                )));
            }
        }
        if let Some(offset) = self.forced_offset_seconds {
            if !offset.is_finite() {
                return Err(GenerationError::invalid_input(format!(
                    "forced offset {} must be finite",
                    offset
                )));
            }
        }
        if let Some(step) = self.forced_step_seconds {
            if !(step.is_finite() && step > 0.0) {
                return Err(GenerationError::invalid_input(format!(
                    "forced step {} must be finite and positive",
                    step
                )));
            }
        }
        self.audio.validate()?;
        Ok(())
    }

    pub fn timebase_hints(&self) -> TimebaseHints {
        TimebaseHints {
            forced_bpm: self.forced_bpm,
            forced_offset_seconds: self.forced_offset_seconds,
            forced_step_seconds: self.forced_step_seconds,
        }
    }
}

/// Builder for [`GenerationParams`]; validation happens when the run starts
#[derive(Debug, Clone)]
pub struct GenerationParamsBuilder {
    params: GenerationParams,
}

impl GenerationParamsBuilder {
    pub fn sensitivity(mut self, sensitivity: u8) -> Self {
        self.params.sensitivity = sensitivity;
        self
    }

    pub fn grid(mut self, grid: QuantizationGrid) -> Self {
        self.params.grid = grid;
        self
    }

    pub fn debug_overlay(mut self, enabled: bool) -> Self {
        self.params.debug_overlay = enabled;
        self
    }

    pub fn forced_bpm(mut self, bpm: f64) -> Self {
        self.params.forced_bpm = Some(bpm);
        self
    }

    pub fn forced_offset_seconds(mut self, seconds: f64) -> Self {
        self.params.forced_offset_seconds = Some(seconds);
        self
    }

    pub fn forced_step_seconds(mut self, seconds: f64) -> Self {
        self.params.forced_step_seconds = Some(seconds);
        self
    }

    pub fn build(self) -> GenerationParams {
        self.params
    }
}

/// Envelope, thresholds and raw peaks, returned when the caller asks for them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugOverlay {
    pub envelope: Envelope,
    pub peaks: Vec<Peak>,
}

/// Everything a successful run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSuccess {
    pub draft: ChartDraft,
    pub stats: DetectionStats,
    /// Issue tags of a degraded-but-usable draft
    pub warnings: Vec<IssueTag>,
    pub tempo: TempoEstimate,
    pub quantized_peaks: Vec<QuantizedPeak>,
    pub lane_stats: LaneStats,
    pub assessment: ConfidenceAssessment,
    pub sync: SyncOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_overlay: Option<DebugOverlay>,
    pub stage_durations: BTreeMap<Stage, u64>,
    pub diagnostics: RunDiagnostics,
}

/// Why and where a run failed
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationFailure {
    /// Stage that was running; `None` when params were rejected up front
    pub stage: Option<Stage>,
    pub error: GenerationError,
    pub diagnostics: RunDiagnostics,
}

impl GenerationFailure {
    /// Human-readable reason
    pub fn reason(&self) -> String {
        self.error.message()
    }

    pub fn code(&self) -> i32 {
        self.error.code()
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Success(Box<GenerationSuccess>),
    Cancelled {
        /// Stage that was running when cancellation was observed
        at_stage: Option<Stage>,
        diagnostics: RunDiagnostics,
    },
    Failed(GenerationFailure),
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerationResult::Cancelled { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, GenerationResult::Failed(_))
    }

    pub fn success(&self) -> Option<&GenerationSuccess> {
        match self {
            GenerationResult::Success(success) => Some(success),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&GenerationFailure> {
        match self {
            GenerationResult::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        match self {
            GenerationResult::Success(success) => &success.diagnostics,
            GenerationResult::Cancelled { diagnostics, .. } => diagnostics,
            GenerationResult::Failed(failure) => &failure.diagnostics,
        }
    }

    /// Terminal stage tag matching this outcome
    pub fn terminal_stage(&self) -> Stage {
        match self {
            GenerationResult::Success(_) => Stage::Completed,
            GenerationResult::Cancelled { .. } => Stage::Cancelled,
            GenerationResult::Failed(_) => Stage::Failed,
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        self.terminal_stage().as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio() -> AudioBuffer {
        AudioBuffer::silence(1.0, 44_100)
    }

    #[test]
    fn test_builder_applies_defaults() {
        let defaults = GenerationDefaults {
            sensitivity: 70,
            grid: QuantizationGrid::Eighth,
        };
        let params = GenerationParams::builder(audio(), defaults).build();
        assert_eq!(params.sensitivity, 70);
        assert_eq!(params.grid, QuantizationGrid::Eighth);
        assert!(!params.debug_overlay);
        assert!(params.timebase_hints().is_empty());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_defaults_follow_config() {
        let defaults = GenerationDefaults::default();
        assert_eq!(defaults.sensitivity, 50);
        assert_eq!(defaults.grid, QuantizationGrid::Sixteenth);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let base = || GenerationParams::builder(audio(), GenerationDefaults::default());

        let cases = vec![
            base().sensitivity(101).build(),
            base().forced_bpm(0.0).build(),
            base().forced_bpm(f64::NAN).build(),
            base().forced_offset_seconds(f64::INFINITY).build(),
            base().forced_step_seconds(-0.1).build(),
        ];
        for params in cases {
            let err = params.validate().unwrap_err();
            assert!(
                err.message().starts_with("invalid input:"),
                "{}",
                err.message()
            );
        }
    }

    #[test]
    fn test_validate_rejects_empty_audio() {
        let params =
            GenerationParams::builder(AudioBuffer::new(Vec::new(), 44_100), GenerationDefaults::default())
                .build();
        assert!(matches!(
            params.validate(),
            Err(GenerationError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_negative_offset_is_valid_input() {
        let params = GenerationParams::builder(audio(), GenerationDefaults::default())
            .forced_offset_seconds(-0.02)
            .build();
        assert!(params.validate().is_ok());
    }
}

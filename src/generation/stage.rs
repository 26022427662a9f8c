// Stage state machine for chart generation runs
//
// The stage list, its labels and every legal transition live here. The
// coordinator only moves between stages through `StageMachine::advance`, so an
// illegal jump is reported instead of silently happening.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// Pipeline stage tag
///
/// Linear progression from `AudioInit` to `Finalising`, ending in exactly one
/// of the absorbing terminal tags.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AudioInit,
    ModelLoad,
    Separation,
    OnsetDetection,
    TempoEstimation,
    Quantization,
    Drafting,
    Finalising,
    Completed,
    Cancelled,
    Failed,
}

impl Stage {
    /// Working stages in execution order
    pub const PIPELINE: [Stage; 8] = [
        Stage::AudioInit,
        Stage::ModelLoad,
        Stage::Separation,
        Stage::OnsetDetection,
        Stage::TempoEstimation,
        Stage::Quantization,
        Stage::Drafting,
        Stage::Finalising,
    ];

    /// Legal successors of this stage
    ///
    /// This is the transition table; adding a stage forces an update here.
    pub fn transitions(&self) -> &'static [Stage] {
        match self {
            Stage::AudioInit => &[Stage::ModelLoad, Stage::Cancelled, Stage::Failed],
            Stage::ModelLoad => &[Stage::Separation, Stage::Cancelled, Stage::Failed],
            Stage::Separation => &[Stage::OnsetDetection, Stage::Cancelled, Stage::Failed],
            Stage::OnsetDetection => &[Stage::TempoEstimation, Stage::Cancelled, Stage::Failed],
            Stage::TempoEstimation => &[Stage::Quantization, Stage::Cancelled, Stage::Failed],
            Stage::Quantization => &[Stage::Drafting, Stage::Cancelled, Stage::Failed],
            Stage::Drafting => &[Stage::Finalising, Stage::Cancelled, Stage::Failed],
            Stage::Finalising => &[Stage::Completed, Stage::Cancelled, Stage::Failed],
            Stage::Completed | Stage::Cancelled | Stage::Failed => &[],
        }
    }

    /// Next working stage, or the success terminal after `Finalising`
    ///
    /// # Returns
    /// * `Some(Stage)` - Forward successor
    /// * `None` - This stage is terminal
    pub fn next(&self) -> Option<Stage> {
        self.transitions().first().copied()
    }

    pub fn can_transition_to(&self, to: Stage) -> bool {
        self.transitions().contains(&to)
    }

    /// True for the three absorbing tags
    pub fn is_terminal(&self) -> bool {
        self.transitions().is_empty()
    }

    /// Get human-readable name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::AudioInit => "Preparing audio",
            Stage::ModelLoad => "Loading separation model",
            Stage::Separation => "Isolating drums",
            Stage::OnsetDetection => "Detecting onsets",
            Stage::TempoEstimation => "Estimating tempo",
            Stage::Quantization => "Quantizing to grid",
            Stage::Drafting => "Drafting chart",
            Stage::Finalising => "Finalising",
            Stage::Completed => "Completed",
            Stage::Cancelled => "Cancelled",
            Stage::Failed => "Failed",
        }
    }

    /// Stable identifier used in logs and diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AudioInit => "audio_init",
            Stage::ModelLoad => "model_load",
            Stage::Separation => "separation",
            Stage::OnsetDetection => "onset_detection",
            Stage::TempoEstimation => "tempo_estimation",
            Stage::Quantization => "quantization",
            Stage::Drafting => "drafting",
            Stage::Finalising => "finalising",
            Stage::Completed => "completed",
            Stage::Cancelled => "cancelled",
            Stage::Failed => "failed",
        }
    }
}

/// Coordinator-level lifecycle observed by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum CoordinatorState {
    /// No run active; initial state and the state after acknowledging a result
    Idle,
    /// Validating params before the staged pipeline starts
    Preparing,
    /// A working stage is executing
    Running(Stage),
    Complete,
    Cancelled,
    Error,
}

impl CoordinatorState {
    /// True once a run has ended and the result awaits acknowledgement
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoordinatorState::Complete | CoordinatorState::Cancelled | CoordinatorState::Error
        )
    }

    /// True while a run is in flight
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CoordinatorState::Preparing | CoordinatorState::Running(_)
        )
    }
}

impl From<Stage> for CoordinatorState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Completed => CoordinatorState::Complete,
            Stage::Cancelled => CoordinatorState::Cancelled,
            Stage::Failed => CoordinatorState::Error,
            working => CoordinatorState::Running(working),
        }
    }
}

/// Tracks the current stage of one run and how long each stage took
#[derive(Debug)]
pub struct StageMachine {
    current: Option<Stage>,
    entered_at: Instant,
    durations: BTreeMap<Stage, u64>,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    /// Machine positioned before the first stage (the coordinator's
    /// `Preparing` phase)
    pub fn new() -> Self {
        Self {
            current: None,
            entered_at: Instant::now(),
            durations: BTreeMap::new(),
        }
    }

    /// Current stage, `None` before the first transition
    pub fn current(&self) -> Option<Stage> {
        self.current
    }

    /// Milliseconds spent in each finished stage
    pub fn durations(&self) -> &BTreeMap<Stage, u64> {
        &self.durations
    }

    /// Milliseconds spent in the current stage so far
    pub fn elapsed_in_stage_ms(&self) -> u64 {
        self.entered_at.elapsed().as_millis() as u64
    }

    /// Move to `to`, recording the duration of the stage being left
    ///
    /// From the initial position only `AudioInit` or a failure/cancel
    /// terminal is accepted.
    pub fn advance(&mut self, to: Stage) -> Result<(), GenerationError> {
        let allowed = match self.current {
            None => matches!(to, Stage::AudioInit | Stage::Cancelled | Stage::Failed),
            Some(from) => from.can_transition_to(to),
        };

        if !allowed {
            return Err(GenerationError::InvalidTransition {
                from: self.current.unwrap_or(Stage::AudioInit),
                to,
            });
        }

        if let Some(from) = self.current {
            self.durations.insert(from, self.elapsed_in_stage_ms());
        }
        self.current = Some(to);
        self.entered_at = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_follows_next() {
        let mut stage = Stage::AudioInit;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            visited.push(next);
            stage = next;
        }

        let mut expected = Stage::PIPELINE.to_vec();
        expected.push(Stage::Completed);
        assert_eq!(visited, expected);
    }

    #[test]
    fn test_terminals_are_absorbing() {
        for terminal in [Stage::Completed, Stage::Cancelled, Stage::Failed] {
            assert!(terminal.is_terminal());
            assert_eq!(terminal.next(), None);
            for stage in Stage::PIPELINE {
                assert!(!terminal.can_transition_to(stage));
            }
        }
    }

    #[test]
    fn test_cancel_and_fail_reachable_from_every_working_stage() {
        for stage in Stage::PIPELINE {
            assert!(!stage.is_terminal());
            assert!(stage.can_transition_to(Stage::Cancelled));
            assert!(stage.can_transition_to(Stage::Failed));
            assert!(!stage.can_transition_to(Stage::Completed) || stage == Stage::Finalising);
        }
    }

    #[test]
    fn test_machine_rejects_skips() {
        let mut machine = StageMachine::new();
        assert!(machine.advance(Stage::AudioInit).is_ok());
        assert_eq!(
            machine.advance(Stage::Drafting),
            Err(GenerationError::InvalidTransition {
                from: Stage::AudioInit,
                to: Stage::Drafting
            })
        );
        assert_eq!(machine.current(), Some(Stage::AudioInit));
    }

    #[test]
    fn test_machine_records_durations() {
        let mut machine = StageMachine::new();
        machine.advance(Stage::AudioInit).unwrap();
        machine.advance(Stage::ModelLoad).unwrap();
        machine.advance(Stage::Cancelled).unwrap();

        assert!(machine.durations().contains_key(&Stage::AudioInit));
        assert!(machine.durations().contains_key(&Stage::ModelLoad));
        assert!(!machine.durations().contains_key(&Stage::Cancelled));
        assert!(machine.advance(Stage::Separation).is_err());
    }

    #[test]
    fn test_machine_can_fail_before_first_stage() {
        let mut machine = StageMachine::new();
        assert!(machine.advance(Stage::Failed).is_ok());
        assert!(machine.current().is_some_and(|s| s.is_terminal()));
    }

    #[test]
    fn test_coordinator_state_from_stage() {
        assert_eq!(
            CoordinatorState::from(Stage::Separation),
            CoordinatorState::Running(Stage::Separation)
        );
        assert_eq!(CoordinatorState::from(Stage::Failed), CoordinatorState::Error);
        assert!(CoordinatorState::Complete.is_terminal());
        assert!(CoordinatorState::Preparing.is_active());
        assert!(!CoordinatorState::Idle.is_active());
    }
}

// Progress events emitted by a generation run, and a caller-side stall monitor

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::stage::Stage;

/// One progress record of a run
///
/// Stage transitions and in-stage progress updates carry
/// `is_heartbeat = false`. Heartbeats repeat the current stage and the last
/// reported progress fraction and only signal liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub run_id: u64,
    pub stage: Stage,
    pub stage_label: String,
    /// Stage-local progress fraction in [0, 1]
    pub stage_progress: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub is_heartbeat: bool,
    /// Milliseconds spent in every finished stage so far
    pub stage_durations: BTreeMap<Stage, u64>,
    /// Milliseconds since the run started
    pub elapsed_ms: u64,
}

impl GenerationProgress {
    pub fn transition(
        run_id: u64,
        stage: Stage,
        stage_durations: BTreeMap<Stage, u64>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            run_id,
            stage,
            stage_label: stage.display_name().to_string(),
            stage_progress: if stage.is_terminal() { 1.0 } else { 0.0 },
            message: None,
            is_heartbeat: false,
            stage_durations,
            elapsed_ms,
        }
    }

    pub fn heartbeat(
        run_id: u64,
        stage: Stage,
        stage_durations: BTreeMap<Stage, u64>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            is_heartbeat: true,
            ..Self::transition(run_id, stage, stage_durations, elapsed_ms)
        }
    }

    /// Set the stage-local fraction, clamped to [0, 1]
    pub fn with_progress(mut self, fraction: f32) -> Self {
        self.stage_progress = clamp_fraction(fraction);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

fn clamp_fraction(fraction: f32) -> f32 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Stage-local progress fraction shared between a blocking stage and the
/// run's task
///
/// The stage writes; the coordinator samples it on every heartbeat tick.
#[derive(Debug, Clone, Default)]
pub struct StageProgress {
    bits: Arc<AtomicU32>,
}

impl StageProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, fraction: f32) {
        self.bits
            .store(clamp_fraction(fraction).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Liveness of a run as seen by a [`StallMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallStatus {
    /// Time since any event, heartbeats included
    pub silent_for: Duration,
    /// Time since the last stage transition
    pub in_stage_for: Duration,
    pub stalled: bool,
}

/// Caller-side helper that flags a run whose events stopped arriving
///
/// Stalling is an observability signal only; deciding to cancel is up to the
/// caller.
#[derive(Debug, Clone)]
pub struct StallMonitor {
    threshold: Duration,
    last_event: Instant,
    last_transition: Instant,
    last_stage: Option<Stage>,
}

impl StallMonitor {
    pub fn new(threshold: Duration) -> Self {
        let now = Instant::now();
        Self {
            threshold,
            last_event: now,
            last_transition: now,
            last_stage: None,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn observe(&mut self, event: &GenerationProgress) {
        self.observe_at(event, Instant::now());
    }

    pub fn observe_at(&mut self, event: &GenerationProgress, now: Instant) {
        self.last_event = now;
        // In-stage progress updates do not restart the stage clock
        if !event.is_heartbeat && self.last_stage != Some(event.stage) {
            self.last_transition = now;
            self.last_stage = Some(event.stage);
        }
    }

    pub fn last_stage(&self) -> Option<Stage> {
        self.last_stage
    }

    pub fn status(&self) -> StallStatus {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> StallStatus {
        let silent_for = now.saturating_duration_since(self.last_event);
        let finished = self.last_stage.is_some_and(|s| s.is_terminal());
        StallStatus {
            silent_for,
            in_stage_for: now.saturating_duration_since(self.last_transition),
            stalled: !finished && silent_for >= self.threshold,
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.status().stalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stage: Stage, heartbeat: bool) -> GenerationProgress {
        if heartbeat {
            GenerationProgress::heartbeat(1, stage, BTreeMap::new(), 0)
        } else {
            GenerationProgress::transition(1, stage, BTreeMap::new(), 0)
        }
    }

    #[test]
    fn test_transition_and_heartbeat_records() {
        let transition = event(Stage::Separation, false);
        assert_eq!(transition.stage_label, "Isolating drums");
        assert!(!transition.is_heartbeat);
        assert_eq!(transition.stage_progress, 0.0);

        let heartbeat = event(Stage::Separation, true);
        assert!(heartbeat.is_heartbeat);
        assert_eq!(heartbeat.stage, Stage::Separation);

        assert_eq!(event(Stage::Completed, false).stage_progress, 1.0);
    }

    #[test]
    fn test_serializes_stage_durations_by_id() {
        let mut durations = BTreeMap::new();
        durations.insert(Stage::AudioInit, 3);
        let json = serde_json::to_value(GenerationProgress::transition(
            2,
            Stage::ModelLoad,
            durations,
            3,
        ))
        .unwrap();
        assert_eq!(json["stage"], "model_load");
        assert_eq!(json["stage_durations"]["audio_init"], 3);
    }

    #[test]
    fn test_heartbeats_keep_run_alive() {
        let start = Instant::now();
        let mut monitor = StallMonitor::new(Duration::from_millis(500));
        monitor.observe_at(&event(Stage::Separation, false), start);
        monitor.observe_at(&event(Stage::Separation, true), start + Duration::from_millis(400));

        let status = monitor.status_at(start + Duration::from_millis(800));
        assert!(!status.stalled);
        assert_eq!(status.silent_for, Duration::from_millis(400));
        assert_eq!(status.in_stage_for, Duration::from_millis(800));
    }

    #[test]
    fn test_silence_past_threshold_is_stalled() {
        let start = Instant::now();
        let mut monitor = StallMonitor::new(Duration::from_millis(500));
        monitor.observe_at(&event(Stage::OnsetDetection, false), start);
        assert!(monitor.status_at(start + Duration::from_millis(600)).stalled);
    }

    #[test]
    fn test_progress_updates_keep_stage_clock() {
        let start = Instant::now();
        let mut monitor = StallMonitor::new(Duration::from_millis(500));
        monitor.observe_at(&event(Stage::OnsetDetection, false), start);
        let update = event(Stage::OnsetDetection, false).with_progress(0.5);
        monitor.observe_at(&update, start + Duration::from_millis(300));

        let status = monitor.status_at(start + Duration::from_millis(400));
        assert_eq!(status.silent_for, Duration::from_millis(100));
        assert_eq!(status.in_stage_for, Duration::from_millis(400));
    }

    #[test]
    fn test_stage_progress_is_shared_and_clamped() {
        let progress = StageProgress::new();
        let writer = progress.clone();
        assert_eq!(progress.get(), 0.0);

        writer.set(0.25);
        assert_eq!(progress.get(), 0.25);
        writer.set(3.0);
        assert_eq!(progress.get(), 1.0);
        writer.set(f32::NAN);
        assert_eq!(progress.get(), 0.0);

        writer.set(0.5);
        progress.reset();
        assert_eq!(writer.get(), 0.0);
        assert_eq!(event(Stage::Quantization, true).with_progress(-1.0).stage_progress, 0.0);
    }

    #[test]
    fn test_finished_run_never_stalls() {
        let start = Instant::now();
        let mut monitor = StallMonitor::new(Duration::from_millis(10));
        monitor.observe_at(&event(Stage::Completed, false), start);
        assert!(!monitor.status_at(start + Duration::from_secs(5)).stalled);
        assert_eq!(monitor.last_stage(), Some(Stage::Completed));
    }
}

// Generation coordinator - staged, cancellable orchestration of one run
//
// Each stage's computation runs on the blocking pool while the run's task
// selects over stage completion, the heartbeat interval and the cancellation
// token. Stage transitions are awaited sends raced against the token; the
// terminal event, in-stage progress updates and heartbeats are `try_send`.
// Heartbeats and updates are dropped when the channel is close to full, so a
// slow consumer never holds up a transition and never blocks a cancel.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;

use super::cancel::{CancellationToken, Cancelled};
use super::diagnostics::{RunDiagnostics, RunLog};
use super::progress::{GenerationProgress, StageProgress};
use super::stage::{CoordinatorState, Stage, StageMachine};
use super::{DebugOverlay, GenerationDefaults, GenerationFailure, GenerationParams, GenerationResult, GenerationSuccess};
use crate::analysis::confidence::{ConfidenceInputs, ConfidenceScorer, DetectionStats};
use crate::analysis::lanes::LaneAssigner;
use crate::analysis::onset::OnsetDetector;
use crate::analysis::quantizer::Quantizer;
use crate::analysis::tempo::TempoEstimator;
use crate::chart::{ChartDraft, ChartMetadata, OffsetChange, TimebaseSynchroniser};
use crate::config::AppConfig;
use crate::debug::pipeline_tracer;
use crate::error::{log_generation_error, ErrorCode, GenerationError, IsolationError};
use crate::separation::StemIsolator;

/// Channel slots kept free for stage transitions and the terminal event
const TRANSITION_RESERVE: usize = Stage::PIPELINE.len() + 2;

/// Smallest progress channel the coordinator creates, and the smallest a
/// caller of [`GenerationCoordinator::run`] should pass in
pub const MIN_CHANNEL_CAPACITY: usize = TRANSITION_RESERVE + 4;

/// How a stage ended early
enum StageExit {
    Cancelled,
    Failed(GenerationError),
}

impl From<Cancelled> for StageExit {
    fn from(_: Cancelled) -> Self {
        StageExit::Cancelled
    }
}

impl From<GenerationError> for StageExit {
    fn from(err: GenerationError) -> Self {
        StageExit::Failed(err)
    }
}

/// Isolation errors become `Cancelled` only when the token really was cancelled
fn isolation_exit(err: IsolationError, token: &CancellationToken) -> StageExit {
    match err {
        IsolationError::Cancelled if token.is_cancelled() => StageExit::Cancelled,
        other => StageExit::Failed(other.into()),
    }
}

fn join_error_details(err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        if let Some(message) = payload.downcast_ref::<&str>() {
            format!("stage task panicked: {}", message)
        } else if let Some(message) = payload.downcast_ref::<String>() {
            format!("stage task panicked: {}", message)
        } else {
            "stage task panicked".to_string()
        }
    } else {
        "stage task was cancelled by the runtime".to_string()
    }
}

#[derive(Debug)]
struct CoordinatorShared {
    active: AtomicBool,
    state: Mutex<CoordinatorState>,
    next_run_id: AtomicU64,
}

impl CoordinatorShared {
    fn state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CoordinatorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Marks the coordinator busy for the lifetime of one run
struct RunGuard {
    shared: Arc<CoordinatorShared>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
    }
}

/// Runs chart generation, one run at a time
///
/// Cheap to clone; clones share the active-run guard and observed state.
#[derive(Clone)]
pub struct GenerationCoordinator {
    config: Arc<AppConfig>,
    isolator: Arc<dyn StemIsolator>,
    lane_assigner: Arc<LaneAssigner>,
    shared: Arc<CoordinatorShared>,
}

impl std::fmt::Debug for GenerationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationCoordinator")
            .field("isolator", &self.isolator.name())
            .field("lane_assigner", &self.lane_assigner)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl GenerationCoordinator {
    /// Coordinator with the classifier and layout named by `config.lanes`
    ///
    /// # Errors
    /// `ConfigInvalid` if a configured prototype model cannot be loaded
    pub fn new(config: AppConfig, isolator: Arc<dyn StemIsolator>) -> Result<Self, GenerationError> {
        let lane_assigner = LaneAssigner::from_config(&config.lanes)?;
        Ok(Self::with_lane_assigner(config, isolator, lane_assigner))
    }

    pub fn with_lane_assigner(
        config: AppConfig,
        isolator: Arc<dyn StemIsolator>,
        lane_assigner: LaneAssigner,
    ) -> Self {
        tracing::info!(
            "[Coordinator] Created with isolator={} classifier={} lanes={}",
            isolator.name(),
            lane_assigner.classifier_name(),
            lane_assigner.layout().lane_count()
        );
        Self {
            config: Arc::new(config),
            isolator,
            lane_assigner: Arc::new(lane_assigner),
            shared: Arc::new(CoordinatorShared {
                active: AtomicBool::new(false),
                state: Mutex::new(CoordinatorState::Idle),
                next_run_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Defaults new params should be built from
    pub fn defaults(&self) -> GenerationDefaults {
        GenerationDefaults::from(&self.config.generation)
    }

    pub fn state(&self) -> CoordinatorState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Return a terminal state to `Idle`
    ///
    /// # Returns
    /// `true` if the state was terminal and is now `Idle`
    pub fn acknowledge(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            *state = CoordinatorState::Idle;
            true
        } else {
            false
        }
    }

    fn try_begin(&self) -> Result<RunGuard, GenerationError> {
        self.shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| GenerationError::AlreadyRunning)?;
        Ok(RunGuard {
            shared: Arc::clone(&self.shared),
        })
    }

    fn channel_capacity(&self) -> usize {
        self.config
            .generation
            .progress_channel_capacity
            .max(MIN_CHANNEL_CAPACITY)
    }

    /// Start a run on its own task
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `AlreadyRunning` if another run is active on this coordinator
    pub fn spawn(
        &self,
        params: GenerationParams,
        token: CancellationToken,
    ) -> Result<GenerationHandle, GenerationError> {
        let guard = self.try_begin().inspect_err(|err| {
            log_generation_error(err, "spawn");
        })?;
        let run_id = self.shared.next_run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(self.channel_capacity());

        let coordinator = self.clone();
        let run_token = token.clone();
        let task = tokio::spawn(async move {
            coordinator.execute(guard, run_id, params, run_token, tx).await
        });

        Ok(GenerationHandle {
            run_id,
            token,
            progress: Some(ReceiverStream::new(rx)),
            task,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Run to completion on the caller's task, sending progress to `progress`
    ///
    /// A run that gets through validation sends one transition per entered
    /// stage (up to `Stage::PIPELINE.len()`, eight) plus exactly one terminal
    /// event, so nine events for a completed run. A run rejected up front
    /// sends only the terminal event. Heartbeats and in-stage updates come on
    /// top and are dropped rather than queued once the channel is nearly full.
    ///
    /// The caller should drain `progress` while the run is going, or pass a
    /// channel of at least [`MIN_CHANNEL_CAPACITY`]. A transition blocked on
    /// a full channel still yields to cancellation, and the terminal event is
    /// never waited for: on a full channel it is dropped and the returned
    /// result is the only record of the outcome.
    ///
    /// Overlapping runs are refused with an `AlreadyRunning` failure that
    /// leaves the active run untouched.
    pub async fn run(
        &self,
        params: GenerationParams,
        token: CancellationToken,
        progress: mpsc::Sender<GenerationProgress>,
    ) -> GenerationResult {
        match self.try_begin() {
            Ok(guard) => {
                if progress.max_capacity() < MIN_CHANNEL_CAPACITY {
                    tracing::warn!(
                        "[Coordinator] Progress channel of {} slots is below {}; undrained events may block transitions",
                        progress.max_capacity(),
                        MIN_CHANNEL_CAPACITY
                    );
                }
                let run_id = self.shared.next_run_id.fetch_add(1, Ordering::SeqCst) + 1;
                self.execute(guard, run_id, params, token, progress).await
            }
            Err(error) => {
                log_generation_error(&error, "run");
                GenerationResult::Failed(GenerationFailure {
                    stage: None,
                    error,
                    diagnostics: RunDiagnostics::default(),
                })
            }
        }
    }

    async fn execute(
        &self,
        _guard: RunGuard,
        run_id: u64,
        params: GenerationParams,
        token: CancellationToken,
        tx: mpsc::Sender<GenerationProgress>,
    ) -> GenerationResult {
        let log = Arc::new(RunLog::new(run_id, self.config.generation.run_log_capacity));
        let heartbeat_every = Duration::from_millis(self.config.generation.heartbeat_interval_ms.max(1));
        let mut driver = RunDriver::new(
            run_id,
            token,
            tx,
            Arc::clone(&log),
            heartbeat_every,
            Arc::clone(&self.shared),
        );

        self.shared.set_state(CoordinatorState::Preparing);
        tracing::info!(
            "[Coordinator] Run {} preparing: {} samples @ {} Hz, sensitivity {}, grid {}",
            run_id,
            params.audio.len(),
            params.audio.sample_rate(),
            params.sensitivity,
            params.grid
        );
        pipeline_tracer::trace_run_start(
            run_id,
            params.audio.len(),
            params.audio.sample_rate(),
            params.sensitivity,
        );

        if let Err(error) = params.validate() {
            return driver.fail(error);
        }
        log.info(None, "params validated");

        match self.pipeline(&mut driver, &params).await {
            Ok(success) => driver.complete(success),
            Err(StageExit::Cancelled) => driver.cancelled(),
            Err(StageExit::Failed(error)) => driver.fail(error),
        }
    }

    async fn pipeline(
        &self,
        driver: &mut RunDriver,
        params: &GenerationParams,
    ) -> Result<GenerationSuccess, StageExit> {
        let sensitivity = params.sensitivity;
        let grid = params.grid;
        let forced_bpm = params.forced_bpm;
        let hints = params.timebase_hints();

        driver.enter(Stage::AudioInit).await?;
        let audio = params.audio.clone();
        let (duration_seconds, peak_amplitude) = driver
            .execute(move || Ok((audio.duration_seconds(), audio.peak_amplitude())))
            .await?;
        driver.log.info(
            Some(Stage::AudioInit),
            format!(
                "{:.2}s of audio, peak amplitude {:.3}",
                duration_seconds, peak_amplitude
            ),
        );

        driver.enter(Stage::ModelLoad).await?;
        let isolator = Arc::clone(&self.isolator);
        let token = driver.token.clone();
        driver
            .execute(move || {
                isolator
                    .load_model(&token)
                    .map_err(|err| isolation_exit(err, &token))
            })
            .await?;
        driver
            .log
            .info(Some(Stage::ModelLoad), format!("isolator {} ready", self.isolator.name()));

        driver.enter(Stage::Separation).await?;
        let isolator = Arc::clone(&self.isolator);
        let token = driver.token.clone();
        let mix = params.audio.clone();
        let stem = driver
            .execute(move || {
                let stem = isolator
                    .isolate(&mix, &token)
                    .map_err(|err| isolation_exit(err, &token))?;
                stem.validate()
                    .map_err(|err| GenerationError::SeparationFailed {
                        reason: format!("isolator returned an unusable stem: {}", err.message()),
                    })?;
                Ok(stem)
            })
            .await?;
        driver.log.info(
            Some(Stage::Separation),
            format!("stem of {} samples", stem.len()),
        );

        driver.enter(Stage::OnsetDetection).await?;
        let onset_config = self.config.onset_detection.clone();
        let token = driver.token.clone();
        let progress = driver.stage_progress.clone();
        let analysis = Arc::new(
            driver
                .execute(move || {
                    let detector = OnsetDetector::new(stem.sample_rate(), onset_config);
                    Ok(detector.detect_with_progress(
                        stem.samples(),
                        sensitivity,
                        &token,
                        &progress,
                    )?)
                })
                .await?,
        );
        pipeline_tracer::trace_onsets(analysis.envelope.len(), analysis.peaks.len());
        driver.log.info(
            Some(Stage::OnsetDetection),
            format!(
                "{} peaks over {} frames",
                analysis.peaks.len(),
                analysis.envelope.len()
            ),
        );

        driver.enter(Stage::TempoEstimation).await?;
        let estimator = TempoEstimator::new(self.config.tempo.clone());
        let peaks = Arc::clone(&analysis);
        let tempo = driver
            .execute(move || Ok(estimator.estimate(&peaks.peaks)))
            .await?;
        let bpm = forced_bpm.unwrap_or(tempo.bpm);
        pipeline_tracer::trace_tempo(bpm, tempo.ambiguity, forced_bpm.is_some());
        driver.log.info(
            Some(Stage::TempoEstimation),
            format!(
                "estimated {:.2} BPM (ambiguity {:.2}), quantizing at {:.2}",
                tempo.bpm, tempo.ambiguity, bpm
            ),
        );

        driver.enter(Stage::Quantization).await?;
        let quantizer = Quantizer::new(&self.config.quantization);
        let peaks = Arc::clone(&analysis);
        let (quantized, summary) = driver
            .execute(move || {
                let quantized = quantizer.quantize(&peaks.peaks, bpm, grid, 0.0);
                let summary = quantizer.summarize(&quantized, bpm, grid);
                Ok((quantized, summary))
            })
            .await?;
        let quantized = Arc::new(quantized);
        pipeline_tracer::trace_quantized(
            grid.display_name(),
            summary.coverage,
            summary.mean_snap_error_ms,
        );
        driver.log.info(
            Some(Stage::Quantization),
            format!(
                "grid {} step {:.2}ms coverage {:.2} mean error {:.2}ms",
                grid, summary.step_ms, summary.coverage, summary.mean_snap_error_ms
            ),
        );

        driver.enter(Stage::Drafting).await?;
        let lane_assigner = Arc::clone(&self.lane_assigner);
        let drafted = Arc::clone(&quantized);
        let estimated_bpm = tempo.bpm;
        let (draft, lane_stats) = driver
            .execute(move || {
                let assignment = lane_assigner.assign(&drafted);
                // Low-confidence snaps are bookmarked for review
                let bookmarks: BTreeSet<i64> = drafted
                    .iter()
                    .filter(|q| q.low_confidence)
                    .map(|q| (q.snapped_time_ms.round() as i64).max(0))
                    .collect();
                let metadata = ChartMetadata {
                    source_duration_ms: (duration_seconds * 1000.0).round() as i64,
                    ..ChartMetadata::default()
                };
                let draft = ChartDraft::new(
                    metadata,
                    estimated_bpm,
                    0,
                    grid.divisor(),
                    lane_assigner.layout().lane_count(),
                )
                .with_hit_objects(assignment.hit_objects)
                .with_bookmarks(bookmarks.into_iter().collect());
                Ok((draft, assignment.stats))
            })
            .await?;
        pipeline_tracer::trace_lanes(
            draft.hit_objects.len(),
            lane_stats.distinct_lanes,
            lane_stats.fallback_count,
        );
        driver.log.info(
            Some(Stage::Drafting),
            format!(
                "{} hit objects on {} lanes, longest run {}",
                draft.hit_objects.len(),
                lane_stats.distinct_lanes,
                lane_stats.longest_run
            ),
        );

        driver.enter(Stage::Finalising).await?;
        let scorer = ConfidenceScorer::new(self.config.confidence.clone());
        let peak_count = analysis.peaks.len();
        let tempo_ambiguity = if forced_bpm.is_some() { 0.0 } else { tempo.ambiguity };
        let (draft, sync, inputs, assessment) = driver
            .execute(move || {
                let (draft, sync) = TimebaseSynchroniser::new().synchronise(draft, &hints);
                draft.validate().map_err(|problem| GenerationError::StageTaskFailed {
                    stage: Stage::Finalising,
                    details: format!("draft failed consistency check: {}", problem),
                })?;
                let inputs = ConfidenceInputs {
                    peak_count,
                    duration_seconds,
                    coverage: summary.coverage,
                    mean_snap_error_ms: summary.mean_snap_error_ms,
                    step_ms: summary.step_ms,
                    tempo_ambiguity,
                };
                let assessment = scorer.assess(&inputs);
                Ok((draft, sync, inputs, assessment))
            })
            .await?;

        if let OffsetChange::Rejected {
            delta_ms,
            earliest_ms,
        } = sync.offset
        {
            driver.log.warn(
                Some(Stage::Finalising),
                format!(
                    "forced offset shift of {} ms rejected: entity at {} ms would become negative",
                    delta_ms, earliest_ms
                ),
            );
        }
        for issue in &assessment.issues {
            driver.log.warn(Some(Stage::Finalising), issue.message());
        }
        driver.log.info(
            Some(Stage::Finalising),
            format!("confidence {:.3}", assessment.score),
        );

        // A cancel that lands during the last stage still wins over success
        driver.checkpoint()?;

        let stats = DetectionStats::new(&inputs, &assessment, bpm, sensitivity, grid);
        let debug_overlay = params.debug_overlay.then(|| DebugOverlay {
            envelope: analysis.envelope.clone(),
            peaks: analysis.peaks.clone(),
        });
        let quantized_peaks = Arc::try_unwrap(quantized).unwrap_or_else(|shared| (*shared).clone());

        Ok(GenerationSuccess {
            draft,
            stats,
            warnings: assessment.issues.clone(),
            tempo,
            quantized_peaks,
            lane_stats,
            assessment,
            sync,
            debug_overlay,
            stage_durations: Default::default(),
            diagnostics: RunDiagnostics::default(),
        })
    }
}

/// Per-run state owned by the run's task
struct RunDriver {
    run_id: u64,
    token: CancellationToken,
    tx: mpsc::Sender<GenerationProgress>,
    log: Arc<RunLog>,
    machine: StageMachine,
    heartbeat_every: Duration,
    shared: Arc<CoordinatorShared>,
    /// Written by the running stage, sampled on heartbeat ticks
    stage_progress: StageProgress,
    /// Fraction most recently published for the current stage
    reported_progress: f32,
    dropped_heartbeats: u64,
}

impl RunDriver {
    fn new(
        run_id: u64,
        token: CancellationToken,
        tx: mpsc::Sender<GenerationProgress>,
        log: Arc<RunLog>,
        heartbeat_every: Duration,
        shared: Arc<CoordinatorShared>,
    ) -> Self {
        Self {
            run_id,
            token,
            tx,
            log,
            machine: StageMachine::new(),
            heartbeat_every,
            shared,
            stage_progress: StageProgress::new(),
            reported_progress: 0.0,
            dropped_heartbeats: 0,
        }
    }

    fn checkpoint(&self) -> Result<(), StageExit> {
        Ok(self.token.check()?)
    }

    /// Send a stage transition, giving up as soon as the run is cancelled
    async fn emit(&self, event: GenerationProgress) -> Result<(), StageExit> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                tracing::debug!(
                    "[Coordinator] Run {} cancelled before a transition was queued",
                    self.run_id
                );
                Err(StageExit::Cancelled)
            }
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    tracing::debug!(
                        "[Coordinator] Run {} progress receiver dropped",
                        self.run_id
                    );
                }
                Ok(())
            }
        }
    }

    /// Publish the terminal event without waiting for channel space
    fn emit_terminal(&self, event: GenerationProgress) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.log
                    .warn(None, "terminal event dropped: progress channel full");
                tracing::warn!(
                    "[Coordinator] Run {} terminal event dropped on a full channel",
                    self.run_id
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    "[Coordinator] Run {} progress receiver dropped",
                    self.run_id
                );
            }
        }
    }

    /// Called on every heartbeat tick: an in-stage progress update if the
    /// stage's fraction grew since the last report, otherwise a heartbeat
    /// repeating the last reported fraction
    fn tick(&mut self, stage: Stage) {
        // Leave room for the transitions still to come
        if self.tx.capacity() <= TRANSITION_RESERVE {
            self.dropped_heartbeats += 1;
            return;
        }
        let fraction = self.stage_progress.get();
        let elapsed_in_stage = self.machine.elapsed_in_stage_ms();
        let event = if fraction > self.reported_progress {
            GenerationProgress::transition(
                self.run_id,
                stage,
                self.machine.durations().clone(),
                self.log.elapsed_ms(),
            )
            .with_progress(fraction)
            .with_message(format!("{:.0}% done", fraction * 100.0))
        } else {
            GenerationProgress::heartbeat(
                self.run_id,
                stage,
                self.machine.durations().clone(),
                self.log.elapsed_ms(),
            )
            .with_progress(self.reported_progress)
            .with_message(format!(
                "{} for {} ms",
                stage.display_name(),
                elapsed_in_stage
            ))
        };
        let is_update = !event.is_heartbeat;
        match self.tx.try_send(event) {
            Ok(()) if is_update => self.reported_progress = fraction,
            Ok(()) => {}
            Err(_) => self.dropped_heartbeats += 1,
        }
    }

    async fn enter(&mut self, stage: Stage) -> Result<(), StageExit> {
        self.checkpoint()?;
        let previous = self.machine.current();
        self.machine.advance(stage)?;

        if let Some(previous) = previous {
            if let Some(ms) = self.machine.durations().get(&previous) {
                pipeline_tracer::trace_stage_exit(self.run_id, previous.as_str(), *ms);
            }
        }
        pipeline_tracer::trace_stage_enter(self.run_id, stage.as_str());
        self.shared.set_state(CoordinatorState::Running(stage));
        self.stage_progress.reset();
        self.reported_progress = 0.0;
        tracing::debug!(
            "[Coordinator] Run {} entered {}",
            self.run_id,
            stage.display_name()
        );

        self.emit(GenerationProgress::transition(
            self.run_id,
            stage,
            self.machine.durations().clone(),
            self.log.elapsed_ms(),
        ))
        .await
    }

    /// Run `work` on the blocking pool, heartbeating until it finishes or
    /// the token is cancelled
    async fn execute<T, F>(&mut self, work: F) -> Result<T, StageExit>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StageExit> + Send + 'static,
    {
        let stage = self.machine.current().unwrap_or(Stage::AudioInit);
        let token = self.token.clone();
        let mut task = tokio::task::spawn_blocking(work);
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.heartbeat_every,
            self.heartbeat_every,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!(
                        "[Coordinator] Run {} cancelled while in {}",
                        self.run_id,
                        stage.display_name()
                    );
                    return Err(StageExit::Cancelled);
                }
                joined = &mut task => {
                    return match joined {
                        Ok(result) => result,
                        Err(err) => Err(StageExit::Failed(GenerationError::StageTaskFailed {
                            stage,
                            details: join_error_details(err),
                        })),
                    };
                }
                _ = heartbeat.tick() => self.tick(stage),
            }
        }
    }

    /// Move to `terminal` and publish it
    fn finish(&mut self, terminal: Stage, message: Option<String>) {
        if let Err(err) = self.machine.advance(terminal) {
            tracing::warn!("[Coordinator] Run {}: {}", self.run_id, err);
        }
        self.shared.set_state(CoordinatorState::from(terminal));
        if self.dropped_heartbeats > 0 {
            self.log.info(
                None,
                format!("{} heartbeats dropped on a full channel", self.dropped_heartbeats),
            );
        }
        pipeline_tracer::trace_run_end(self.run_id, terminal.as_str(), self.log.elapsed_ms());

        let mut event = GenerationProgress::transition(
            self.run_id,
            terminal,
            self.machine.durations().clone(),
            self.log.elapsed_ms(),
        );
        event.message = message;
        self.emit_terminal(event);
    }

    fn complete(&mut self, mut success: GenerationSuccess) -> GenerationResult {
        self.log.info(None, "run completed");
        self.finish(Stage::Completed, None);
        tracing::info!(
            "[Coordinator] Run {} completed: {} hit objects, confidence {:.3}",
            self.run_id,
            success.draft.hit_objects.len(),
            success.stats.confidence
        );

        success.stage_durations = self.machine.durations().clone();
        success.diagnostics = self.log.snapshot();
        GenerationResult::Success(Box::new(success))
    }

    fn cancelled(&mut self) -> GenerationResult {
        let at_stage = self.machine.current();
        self.log.info(at_stage, "run cancelled");
        tracing::info!(
            "[Coordinator] Run {} cancelled at {}",
            self.run_id,
            at_stage.map(|s| s.as_str()).unwrap_or("preparing")
        );
        self.finish(Stage::Cancelled, Some("cancelled".to_string()));

        GenerationResult::Cancelled {
            at_stage,
            diagnostics: self.log.snapshot(),
        }
    }

    fn fail(&mut self, error: GenerationError) -> GenerationResult {
        let stage = self.machine.current();
        let reason = error.message();
        self.log.error(stage, reason.clone());
        log_generation_error(
            &error,
            stage.map(|s| s.as_str()).unwrap_or("preparing"),
        );
        self.finish(Stage::Failed, Some(reason));

        GenerationResult::Failed(GenerationFailure {
            stage,
            error,
            diagnostics: self.log.snapshot(),
        })
    }
}

/// A run started with [`GenerationCoordinator::spawn`]
#[derive(Debug)]
pub struct GenerationHandle {
    run_id: u64,
    token: CancellationToken,
    progress: Option<ReceiverStream<GenerationProgress>>,
    task: JoinHandle<GenerationResult>,
    shared: Arc<CoordinatorShared>,
}

impl GenerationHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Request cancellation of this run
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Progress events of this run as a `Stream`; `None` once taken
    pub fn take_progress(&mut self) -> Option<ReceiverStream<GenerationProgress>> {
        self.progress.take()
    }

    /// Wait for the terminal result
    pub async fn result(self) -> GenerationResult {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                let stage = match self.shared.state() {
                    CoordinatorState::Running(stage) => stage,
                    _ => Stage::AudioInit,
                };
                self.shared.set_state(CoordinatorState::Error);
                let error = GenerationError::StageTaskFailed {
                    stage,
                    details: join_error_details(err),
                };
                log_generation_error(&error, "run task");
                GenerationResult::Failed(GenerationFailure {
                    stage: Some(stage),
                    error,
                    diagnostics: RunDiagnostics {
                        run_id: self.run_id,
                        ..Default::default()
                    },
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;

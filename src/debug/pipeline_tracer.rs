// Pipeline Tracer - Diagnostic logging for chart generation runs
//
// Emits one structured line per trace point so a run can be followed stage by
// stage without a debugger. Nothing is formatted unless tracing is enabled.
//
// Usage:
//   - Enable with DRUMCHART_TRACE=1 environment variable
//   - Traces appear in logs with [TRACE] prefix
//   - Each trace includes the trace point, a sequence number, a timestamp and metrics

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Global flag to enable/disable pipeline tracing
static TRACING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Counter for trace events (helps correlate related traces)
static TRACE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize pipeline tracing based on environment variable
pub fn init() {
    let enabled = std::env::var("DRUMCHART_TRACE")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);
    TRACING_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled {
        log::info!("[TRACE] Pipeline tracing ENABLED - set DRUMCHART_TRACE=0 to disable");
    }
}

/// Check if tracing is enabled
#[inline]
pub fn is_enabled() -> bool {
    TRACING_ENABLED.load(Ordering::Relaxed)
}

/// Enable tracing at runtime
pub fn enable() {
    TRACING_ENABLED.store(true, Ordering::SeqCst);
    log::info!("[TRACE] Pipeline tracing enabled at runtime");
}

/// Disable tracing at runtime
pub fn disable() {
    TRACING_ENABLED.store(false, Ordering::SeqCst);
    log::info!("[TRACE] Pipeline tracing disabled at runtime");
}

/// Trace points along a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracePoint {
    /// Run accepted with validated params
    RunStart,
    /// Coordinator moved to a new stage
    StageEnter,
    /// Stage finished with its duration
    StageExit,
    /// Onset detection summary
    Onsets,
    /// Tempo estimate
    Tempo,
    /// Quantization summary
    Quantized,
    /// Lane assignment summary
    Lanes,
    /// Terminal outcome
    RunEnd,
}

impl TracePoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            TracePoint::RunStart => "RUN_START",
            TracePoint::StageEnter => "STAGE_IN",
            TracePoint::StageExit => "STAGE_OUT",
            TracePoint::Onsets => "ONSETS",
            TracePoint::Tempo => "TEMPO",
            TracePoint::Quantized => "QUANTIZE",
            TracePoint::Lanes => "LANES",
            TracePoint::RunEnd => "RUN_END",
        }
    }
}

/// Global start time for relative timestamps
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

fn get_timestamp_us() -> u64 {
    let start = START_TIME.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Log a trace event at a trace point
///
/// Only logs if DRUMCHART_TRACE=1 is set (or tracing was enabled at runtime).
#[inline]
pub fn trace(point: TracePoint, message: &str) {
    if !is_enabled() {
        return;
    }

    let id = TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = get_timestamp_us();

    log::info!(
        "[TRACE] {:>10} #{:06} @{:>10}us | {}",
        point.as_str(),
        id,
        ts,
        message
    );
}

/// Log a trace event with formatted arguments
#[macro_export]
macro_rules! trace_pipeline {
    ($point:expr, $($arg:tt)*) => {
        if $crate::debug::pipeline_tracer::is_enabled() {
            $crate::debug::pipeline_tracer::trace($point, &format!($($arg)*));
        }
    };
}

pub fn trace_run_start(run_id: u64, samples: usize, sample_rate: u32, sensitivity: u8) {
    trace_pipeline!(
        TracePoint::RunStart,
        "run={} samples={} sr={} sensitivity={}",
        run_id,
        samples,
        sample_rate,
        sensitivity
    );
}

pub fn trace_stage_enter(run_id: u64, stage: &str) {
    trace_pipeline!(TracePoint::StageEnter, "run={} stage={}", run_id, stage);
}

pub fn trace_stage_exit(run_id: u64, stage: &str, duration_ms: u64) {
    trace_pipeline!(
        TracePoint::StageExit,
        "run={} stage={} took={}ms",
        run_id,
        stage,
        duration_ms
    );
}

pub fn trace_onsets(frames: usize, peaks: usize) {
    trace_pipeline!(TracePoint::Onsets, "frames={} peaks={}", frames, peaks);
}

pub fn trace_tempo(bpm: f64, ambiguity: f32, forced: bool) {
    trace_pipeline!(
        TracePoint::Tempo,
        "bpm={:.2} ambiguity={:.3}{}",
        bpm,
        ambiguity,
        if forced { " (forced)" } else { "" }
    );
}

pub fn trace_quantized(grid: &str, coverage: f64, mean_error_ms: f64) {
    trace_pipeline!(
        TracePoint::Quantized,
        "grid={} coverage={:.3} mean_error={:.2}ms",
        grid,
        coverage,
        mean_error_ms
    );
}

pub fn trace_lanes(hits: usize, distinct_lanes: usize, fallbacks: usize) {
    trace_pipeline!(
        TracePoint::Lanes,
        "hits={} lanes={} fallbacks={}",
        hits,
        distinct_lanes,
        fallbacks
    );
}

pub fn trace_run_end(run_id: u64, outcome: &str, elapsed_ms: u64) {
    trace_pipeline!(
        TracePoint::RunEnd,
        "run={} outcome={} elapsed={}ms",
        run_id,
        outcome,
        elapsed_ms
    );
}

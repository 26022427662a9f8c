// Chart module - in-memory chart draft produced by a generation run
//
// The persisted chart format belongs to whoever consumes the draft. This
// module only defines the structure (serde-serialisable for export and
// debugging) and the timebase synchroniser that adjusts it.

pub mod timebase;

use serde::{Deserialize, Serialize};

use crate::analysis::classifier::DrumComponent;

pub use timebase::{OffsetChange, SyncOutcome, TimebaseHints, TimebaseSynchroniser};

/// Default meter written on generated timing points
pub const DEFAULT_METER: u32 = 4;

/// Descriptive fields; generated drafts carry placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartMetadata {
    pub title: String,
    pub artist: String,
    pub creator: String,
    /// Length of the source audio in milliseconds
    pub source_duration_ms: i64,
}

impl Default for ChartMetadata {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            artist: "Unknown Artist".to_string(),
            creator: "drumchart".to_string(),
            source_duration_ms: 0,
        }
    }
}

/// Start of a constant-tempo section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingPoint {
    pub time_ms: i64,
    pub beat_length_ms: f64,
    pub meter: u32,
}

impl TimingPoint {
    pub fn new(time_ms: i64, bpm: f64) -> Self {
        Self {
            time_ms,
            beat_length_ms: 60_000.0 / bpm,
            meter: DEFAULT_METER,
        }
    }

    pub fn bpm(&self) -> f64 {
        60_000.0 / self.beat_length_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub bpm: f64,
    pub offset_ms: i64,
    /// Ordered by time; the first one sits at `offset_ms`
    pub timing_points: Vec<TimingPoint>,
}

/// A playable drum event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitObject {
    /// Absolute time in milliseconds (never negative)
    pub time_ms: i64,
    /// Lane index within the active layout
    pub lane: usize,
    pub component: DrumComponent,
    /// Relative strength in [0, 1]
    pub velocity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// Hints for the chart editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorMetadata {
    /// Beat snap divisor (1-48)
    pub snap_divisor: u32,
    pub lane_count: usize,
}

/// Generated chart: timing, hit objects, bookmarks and editor hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDraft {
    pub metadata: ChartMetadata,
    pub timing: TimingInfo,
    pub hit_objects: Vec<HitObject>,
    /// Editor bookmarks in milliseconds
    #[serde(default)]
    pub bookmarks: Vec<i64>,
    pub editor: EditorMetadata,
}

impl ChartDraft {
    /// Draft with one timing point at `offset_ms` and no hit objects
    pub fn new(
        metadata: ChartMetadata,
        bpm: f64,
        offset_ms: i64,
        snap_divisor: u32,
        lane_count: usize,
    ) -> Self {
        Self {
            metadata,
            timing: TimingInfo {
                bpm,
                offset_ms,
                timing_points: vec![TimingPoint::new(offset_ms, bpm)],
            },
            hit_objects: Vec::new(),
            bookmarks: Vec::new(),
            editor: EditorMetadata {
                snap_divisor,
                lane_count,
            },
        }
    }

    /// Replace the hit objects, keeping them ordered by time then lane
    pub fn with_hit_objects(mut self, mut hit_objects: Vec<HitObject>) -> Self {
        hit_objects.sort_by(|a, b| a.time_ms.cmp(&b.time_ms).then(a.lane.cmp(&b.lane)));
        self.hit_objects = hit_objects;
        self
    }

    pub fn with_bookmarks(mut self, mut bookmarks: Vec<i64>) -> Self {
        bookmarks.sort_unstable();
        self.bookmarks = bookmarks;
        self
    }

    /// Check structural invariants, describing the first violation
    pub fn validate(&self) -> Result<(), String> {
        let first = self
            .timing
            .timing_points
            .first()
            .ok_or_else(|| "chart has no timing points".to_string())?;
        if first.time_ms != self.timing.offset_ms {
            return Err(format!(
                "first timing point at {} ms but offset is {} ms",
                first.time_ms, self.timing.offset_ms
            ));
        }
        if !(self.timing.bpm.is_finite() && self.timing.bpm > 0.0) {
            return Err(format!("invalid BPM {}", self.timing.bpm));
        }
        if let Some(hit) = self.hit_objects.iter().find(|h| h.time_ms < 0) {
            return Err(format!("hit object at negative time {} ms", hit.time_ms));
        }
        if let Some(hit) = self
            .hit_objects
            .iter()
            .find(|h| h.lane >= self.editor.lane_count)
        {
            return Err(format!(
                "hit object lane {} outside {} lanes",
                hit.lane, self.editor.lane_count
            ));
        }
        if self
            .hit_objects
            .windows(2)
            .any(|pair| pair[0].time_ms > pair[1].time_ms)
        {
            return Err("hit objects out of order".to_string());
        }
        Ok(())
    }
}

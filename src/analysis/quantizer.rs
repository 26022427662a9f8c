//! Quantizer - beat-grid snapping
//!
//! This module snaps detected onsets onto a beat-subdivision grid.
//! Key features:
//! - Five grid resolutions (quarter to thirty-second, plus eighth-note triplets)
//! - Per-peak snap error and grid index
//! - Peaks too far from the grid are flagged, never dropped
//! - Pure and deterministic: same peaks, BPM and grid give identical output
//!
//! Snapped times are `origin + index × step` with `step = 60000 / bpm / divisor`,
//! so every snapped time is an exact grid multiple relative to the origin.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::analysis::onset::Peak;
use crate::config::QuantizationConfig;

/// Tempo used when a caller hands the quantizer an unusable BPM
const FALLBACK_BPM: f64 = 120.0;

/// Beat-subdivision resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationGrid {
    /// One step per beat
    Quarter,
    /// Two steps per beat
    Eighth,
    /// Four steps per beat
    Sixteenth,
    /// Three steps per beat (eighth-note triplets)
    Triplet,
    /// Eight steps per beat
    ThirtySecond,
}

impl QuantizationGrid {
    pub const ALL: [QuantizationGrid; 5] = [
        QuantizationGrid::Quarter,
        QuantizationGrid::Eighth,
        QuantizationGrid::Sixteenth,
        QuantizationGrid::Triplet,
        QuantizationGrid::ThirtySecond,
    ];

    /// Grid steps per beat
    pub fn divisor(&self) -> u32 {
        match self {
            QuantizationGrid::Quarter => 1,
            QuantizationGrid::Eighth => 2,
            QuantizationGrid::Sixteenth => 4,
            QuantizationGrid::Triplet => 3,
            QuantizationGrid::ThirtySecond => 8,
        }
    }

    /// Step length in milliseconds at `bpm`
    pub fn step_ms(&self, bpm: f64) -> f64 {
        60_000.0 / bpm / f64::from(self.divisor())
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            QuantizationGrid::Quarter => "1/4",
            QuantizationGrid::Eighth => "1/8",
            QuantizationGrid::Sixteenth => "1/16",
            QuantizationGrid::Triplet => "1/8T",
            QuantizationGrid::ThirtySecond => "1/32",
        }
    }
}

impl fmt::Display for QuantizationGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for QuantizationGrid {
    type Err = String;

    /// Accepts the serde names (`sixteenth`) and the short labels (`1/16`)
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalised = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalised.as_str() {
            "quarter" | "1/4" | "4" => Ok(QuantizationGrid::Quarter),
            "eighth" | "1/8" | "8" => Ok(QuantizationGrid::Eighth),
            "sixteenth" | "1/16" | "16" => Ok(QuantizationGrid::Sixteenth),
            "triplet" | "1/8t" | "12" => Ok(QuantizationGrid::Triplet),
            "thirty_second" | "thirtysecond" | "1/32" | "32" => Ok(QuantizationGrid::ThirtySecond),
            _ => Err(format!(
                "unknown grid '{}', expected quarter, eighth, sixteenth, triplet or thirty_second",
                value
            )),
        }
    }
}

/// A peak snapped onto the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedPeak {
    pub peak: Peak,
    /// Snapped time in milliseconds
    pub snapped_time_ms: f64,
    /// |original - snapped| in milliseconds
    pub snap_error_ms: f64,
    /// Steps per beat of the grid used
    pub grid_divisor: u32,
    /// Index of the grid line relative to the origin
    pub grid_index: i64,
    /// Snap error exceeded the configured maximum
    pub low_confidence: bool,
}

/// Aggregate quantization quality
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantizationSummary {
    pub step_ms: f64,
    /// Fraction of peaks within the maximum snap error (0 with no peaks)
    pub coverage: f64,
    /// Mean snap error in milliseconds (0 with no peaks)
    pub mean_snap_error_ms: f64,
}

/// Snaps peaks onto a beat grid
#[derive(Debug, Clone)]
pub struct Quantizer {
    max_snap_error_fraction: f64,
}

impl Quantizer {
    pub fn new(config: &QuantizationConfig) -> Self {
        Self {
            max_snap_error_fraction: config.max_snap_error_fraction.max(0.0),
        }
    }

    /// Largest snap error (ms) still counted as covered at `bpm` on `grid`
    pub fn max_snap_error_ms(&self, bpm: f64, grid: QuantizationGrid) -> f64 {
        grid.step_ms(usable_bpm(bpm)) * self.max_snap_error_fraction
    }

    /// Snap every peak to the nearest grid line
    ///
    /// # Arguments
    /// * `peaks` - Time-ordered peaks
    /// * `bpm` - Tempo defining the beat length
    /// * `grid` - Subdivision of the beat
    /// * `origin_ms` - Time of grid line 0
    ///
    /// # Returns
    /// One `QuantizedPeak` per input peak, in input order
    pub fn quantize(
        &self,
        peaks: &[Peak],
        bpm: f64,
        grid: QuantizationGrid,
        origin_ms: f64,
    ) -> Vec<QuantizedPeak> {
        let bpm = usable_bpm(bpm);
        let step_ms = grid.step_ms(bpm);
        let max_error_ms = step_ms * self.max_snap_error_fraction;

        peaks
            .iter()
            .map(|peak| {
                let original_ms = peak.time_ms();
                let grid_index = ((original_ms - origin_ms) / step_ms).round() as i64;
                let snapped_time_ms = origin_ms + grid_index as f64 * step_ms;
                let snap_error_ms = (original_ms - snapped_time_ms).abs();

                QuantizedPeak {
                    peak: peak.clone(),
                    snapped_time_ms,
                    snap_error_ms,
                    grid_divisor: grid.divisor(),
                    grid_index,
                    low_confidence: snap_error_ms > max_error_ms,
                }
            })
            .collect()
    }

    /// Coverage and mean error over a quantized set
    pub fn summarize(
        &self,
        quantized: &[QuantizedPeak],
        bpm: f64,
        grid: QuantizationGrid,
    ) -> QuantizationSummary {
        let step_ms = grid.step_ms(usable_bpm(bpm));
        if quantized.is_empty() {
            return QuantizationSummary {
                step_ms,
                coverage: 0.0,
                mean_snap_error_ms: 0.0,
            };
        }

        let covered = quantized.iter().filter(|q| !q.low_confidence).count();
        let total_error: f64 = quantized.iter().map(|q| q.snap_error_ms).sum();

        QuantizationSummary {
            step_ms,
            coverage: covered as f64 / quantized.len() as f64,
            mean_snap_error_ms: total_error / quantized.len() as f64,
        }
    }
}

fn usable_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        log::warn!(
            "[Quantizer] Unusable BPM {}, falling back to {}",
            bpm,
            FALLBACK_BPM
        );
        FALLBACK_BPM
    }
}

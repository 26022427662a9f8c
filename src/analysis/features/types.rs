// Types module - Data structures for per-peak spectral-shape features
//
// These values are measured once per detected onset and travel with the peak
// through quantization into lane assignment.

use serde::{Deserialize, Serialize};

/// Spectral-shape features measured at a detected onset
///
/// Used by peak classifiers to decide which drum component produced the hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakFeatures {
    /// Spectral centroid in Hz (weighted mean frequency)
    ///
    /// Kicks sit low, cymbals sit high.
    pub centroid: f32,

    /// Spectral rolloff in Hz (85% energy threshold)
    pub rolloff: f32,

    /// Spectral flatness (0.0 = pure tone, 1.0 = white noise)
    pub flatness: f32,

    /// Zero-crossing rate (0.0 to 1.0, normalized)
    pub zcr: f32,

    /// Time from the amplitude peak to the -20 dB point, in milliseconds
    ///
    /// Separates closed from open hi-hats and crashes from everything else.
    pub decay_time_ms: f32,

    /// Fraction of spectral energy below [`LOW_BAND_HZ`](super::LOW_BAND_HZ)
    pub low_band_ratio: f32,

    /// Fraction of spectral energy between the low and high band edges
    pub mid_band_ratio: f32,

    /// Fraction of spectral energy above [`HIGH_BAND_HZ`](super::HIGH_BAND_HZ)
    pub high_band_ratio: f32,
}

impl PeakFeatures {
    /// Features as a fixed-order vector (used by the prototype classifier)
    pub fn to_vector(&self) -> [f32; 8] {
        [
            self.centroid,
            self.rolloff,
            self.flatness,
            self.zcr,
            self.decay_time_ms,
            self.low_band_ratio,
            self.mid_band_ratio,
            self.high_band_ratio,
        ]
    }

    /// True when every feature is zero (silent window)
    pub fn is_silent(&self) -> bool {
        self.to_vector().iter().all(|value| *value == 0.0)
    }
}

// Classifier - peak-to-drum-component classification strategies
//
// Lane assignment needs one drum component per detected peak. The decision is
// made by a `PeakClassifier` chosen when the pipeline is constructed:
//
// - HeuristicClassifier: decision rules over band ratios, flatness, rolloff
//   and decay time, with a score-based confidence
// - PrototypeClassifier: nearest trained prototype in a normalised feature
//   space, rejecting peaks too far from every prototype
//
// Both return `None` for shapes they cannot place; the lane assigner decides
// what to do with those.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::analysis::features::PeakFeatures;
use crate::error::GenerationError;

/// Drum kit component a hit is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumComponent {
    Kick,
    Snare,
    HiHatClosed,
    HiHatOpen,
    TomHigh,
    TomLow,
    Crash,
    Ride,
}

/// Coarse grouping used for lane-switch statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentFamily {
    Kick,
    Snare,
    HiHat,
    Tom,
    Cymbal,
}

impl DrumComponent {
    pub const ALL: [DrumComponent; 8] = [
        DrumComponent::Kick,
        DrumComponent::Snare,
        DrumComponent::HiHatClosed,
        DrumComponent::HiHatOpen,
        DrumComponent::TomHigh,
        DrumComponent::TomLow,
        DrumComponent::Crash,
        DrumComponent::Ride,
    ];

    /// Stable label stored on hit objects
    pub fn label(&self) -> &'static str {
        match self {
            DrumComponent::Kick => "kick",
            DrumComponent::Snare => "snare",
            DrumComponent::HiHatClosed => "hihat_closed",
            DrumComponent::HiHatOpen => "hihat_open",
            DrumComponent::TomHigh => "tom_high",
            DrumComponent::TomLow => "tom_low",
            DrumComponent::Crash => "crash",
            DrumComponent::Ride => "ride",
        }
    }

    pub fn family(&self) -> InstrumentFamily {
        match self {
            DrumComponent::Kick => InstrumentFamily::Kick,
            DrumComponent::Snare => InstrumentFamily::Snare,
            DrumComponent::HiHatClosed | DrumComponent::HiHatOpen => InstrumentFamily::HiHat,
            DrumComponent::TomHigh | DrumComponent::TomLow => InstrumentFamily::Tom,
            DrumComponent::Crash | DrumComponent::Ride => InstrumentFamily::Cymbal,
        }
    }
}

impl fmt::Display for DrumComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of classifying one peak
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// `None` when the shape matches no component well enough
    pub component: Option<DrumComponent>,
    /// Confidence score 0.0-1.0
    pub confidence: f32,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            component: None,
            confidence: 0.0,
        }
    }
}

/// Single-peak classification capability
pub trait PeakClassifier: Send + Sync {
    /// Short identifier for logs and diagnostics
    fn name(&self) -> &'static str;

    fn classify(&self, features: &PeakFeatures) -> Classification;
}

/// Decision thresholds for [`HeuristicClassifier`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicThresholds {
    /// Low-band share above which a tonal hit is a kick or low tom
    pub low_dominant: f32,
    /// Mid-band share above which a tonal hit is a high tom
    pub mid_dominant: f32,
    /// High-band share above which a hit is a hi-hat or cymbal
    pub high_dominant: f32,
    /// Flatness below which a hit counts as tonal
    pub tonal_flatness: f32,
    /// Flatness above which a non-cymbal hit counts as a snare
    pub noisy_flatness: f32,
    /// Kicks decay faster than this; longer low hits are low toms
    pub kick_max_decay_ms: f32,
    /// High toms have their centroid below this
    pub tom_max_centroid_hz: f32,
    /// Cymbal hits with rolloff below this are rides
    pub ride_max_rolloff_hz: f32,
    /// Closed hi-hats decay faster than this
    pub closed_hihat_max_decay_ms: f32,
    /// Hi-hats decay faster than this; longer noisy highs are crashes
    pub open_hihat_max_decay_ms: f32,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            low_dominant: 0.6,
            mid_dominant: 0.5,
            high_dominant: 0.5,
            tonal_flatness: 0.2,
            noisy_flatness: 0.3,
            kick_max_decay_ms: 200.0,
            tom_max_centroid_hz: 1000.0,
            ride_max_rolloff_hz: 9000.0,
            closed_hihat_max_decay_ms: 120.0,
            open_hihat_max_decay_ms: 330.0,
        }
    }
}

/// Rule-based classifier over spectral-shape features
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier {
    thresholds: HeuristicThresholds,
}

impl HeuristicClassifier {
    pub fn new(thresholds: HeuristicThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &HeuristicThresholds {
        &self.thresholds
    }

    /// Apply the decision tree
    fn decide(&self, f: &PeakFeatures) -> Option<DrumComponent> {
        let t = &self.thresholds;

        if f.high_band_ratio >= t.high_dominant {
            return Some(if f.rolloff < t.ride_max_rolloff_hz {
                DrumComponent::Ride
            } else if f.decay_time_ms < t.closed_hihat_max_decay_ms {
                DrumComponent::HiHatClosed
            } else if f.decay_time_ms < t.open_hihat_max_decay_ms {
                DrumComponent::HiHatOpen
            } else {
                DrumComponent::Crash
            });
        }

        if f.flatness < t.tonal_flatness {
            if f.low_band_ratio >= t.low_dominant {
                return Some(if f.decay_time_ms < t.kick_max_decay_ms {
                    DrumComponent::Kick
                } else {
                    DrumComponent::TomLow
                });
            }
            if f.mid_band_ratio >= t.mid_dominant && f.centroid < t.tom_max_centroid_hz {
                return Some(DrumComponent::TomHigh);
            }
            return None;
        }

        if f.flatness >= t.noisy_flatness {
            return Some(DrumComponent::Snare);
        }

        None
    }

    /// Per-component match scores, each roughly in [0, 1]
    fn scores(&self, f: &PeakFeatures) -> [(DrumComponent, f32); 8] {
        let t = &self.thresholds;
        let tonal = 1.0 - f.flatness.clamp(0.0, 1.0);
        let long_decay = rise(
            f.decay_time_ms,
            t.kick_max_decay_ms * 0.75,
            t.kick_max_decay_ms * 1.5,
        );
        let bright = rise(f.rolloff, t.ride_max_rolloff_hz * 0.9, t.ride_max_rolloff_hz * 1.3);
        let closed = fall(
            f.decay_time_ms,
            t.closed_hihat_max_decay_ms * 0.8,
            t.closed_hihat_max_decay_ms * 1.3,
        );
        let crash = rise(
            f.decay_time_ms,
            t.open_hihat_max_decay_ms * 0.9,
            t.open_hihat_max_decay_ms * 1.15,
        );

        [
            (DrumComponent::Kick, f.low_band_ratio * tonal * (1.0 - long_decay)),
            (DrumComponent::TomLow, f.low_band_ratio * tonal * long_decay),
            (
                DrumComponent::TomHigh,
                f.mid_band_ratio * tonal * fall(f.centroid, t.tom_max_centroid_hz, t.tom_max_centroid_hz * 2.0),
            ),
            (
                DrumComponent::Snare,
                rise(f.flatness, t.tonal_flatness, t.noisy_flatness * 2.0) * (1.0 - f.high_band_ratio),
            ),
            (DrumComponent::Ride, f.high_band_ratio * (1.0 - bright)),
            (DrumComponent::HiHatClosed, f.high_band_ratio * bright * closed),
            (
                DrumComponent::HiHatOpen,
                f.high_band_ratio * bright * (1.0 - closed) * (1.0 - crash),
            ),
            (DrumComponent::Crash, f.high_band_ratio * bright * crash),
        ]
    }
}

impl PeakClassifier for HeuristicClassifier {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn classify(&self, features: &PeakFeatures) -> Classification {
        if features.is_silent() {
            return Classification::unknown();
        }

        let Some(component) = self.decide(features) else {
            return Classification::unknown();
        };

        let scores = self.scores(features);
        let sum: f32 = scores.iter().map(|(_, s)| s).sum();
        let own = scores
            .iter()
            .find(|(c, _)| *c == component)
            .map_or(0.0, |(_, s)| *s);

        // Confidence as this component's share of all scores
        let confidence = if sum > 0.0 {
            (own / sum).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Classification {
            component: Some(component),
            confidence,
        }
    }
}

/// A labelled reference point in feature space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    pub component: DrumComponent,
    pub features: PeakFeatures,
}

/// Serialized form of a trained prototype model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrototypeModel {
    /// Peaks farther than this from every prototype stay unclassified
    pub rejection_distance: f32,
    pub prototypes: Vec<Prototype>,
}

/// Per-dimension divisors that bring every feature to a comparable range
const FEATURE_SCALE: [f32; 8] = [10_000.0, 20_000.0, 1.0, 1.0, 400.0, 1.0, 1.0, 1.0];

fn normalised(features: &PeakFeatures) -> [f32; 8] {
    let mut vector = features.to_vector();
    for (value, scale) in vector.iter_mut().zip(FEATURE_SCALE) {
        *value /= scale;
    }
    vector
}

impl PrototypeModel {
    /// Prototypes measured on reference one-shots of each component
    pub fn built_in() -> Self {
        let proto = |component, centroid, rolloff, flatness, zcr, decay_time_ms, low, mid, high| {
            Prototype {
                component,
                features: PeakFeatures {
                    centroid,
                    rolloff,
                    flatness,
                    zcr,
                    decay_time_ms,
                    low_band_ratio: low,
                    mid_band_ratio: mid,
                    high_band_ratio: high,
                },
            }
        };

        Self {
            rejection_distance: 0.6,
            prototypes: vec![
                proto(DrumComponent::Kick, 180.0, 130.0, 0.01, 0.003, 100.0, 0.99, 0.01, 0.0),
                proto(DrumComponent::Snare, 7000.0, 5000.0, 0.68, 0.13, 130.0, 0.53, 0.28, 0.19),
                proto(DrumComponent::HiHatClosed, 13400.0, 19600.0, 0.63, 0.47, 65.0, 0.0, 0.01, 0.99),
                proto(DrumComponent::HiHatOpen, 13400.0, 20400.0, 0.63, 0.46, 230.0, 0.0, 0.01, 0.99),
                proto(DrumComponent::TomHigh, 460.0, 345.0, 0.02, 0.011, 400.0, 0.01, 0.99, 0.0),
                proto(DrumComponent::TomLow, 230.0, 170.0, 0.01, 0.005, 350.0, 0.99, 0.01, 0.0),
                proto(DrumComponent::Crash, 12200.0, 19000.0, 0.82, 0.43, 385.0, 0.0, 0.07, 0.93),
                proto(DrumComponent::Ride, 8500.0, 5860.0, 0.55, 0.16, 390.0, 0.0, 0.33, 0.67),
            ],
        }
    }

    /// Load a model from JSON
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GenerationError> {
        let contents =
            fs::read_to_string(&path).map_err(|err| GenerationError::ConfigInvalid {
                reason: format!("reading {}: {}", path.as_ref().display(), err),
            })?;
        let model: PrototypeModel =
            serde_json::from_str(&contents).map_err(|err| GenerationError::ConfigInvalid {
                reason: format!("parsing {}: {}", path.as_ref().display(), err),
            })?;

        if model.prototypes.is_empty() {
            return Err(GenerationError::ConfigInvalid {
                reason: format!("{} contains no prototypes", path.as_ref().display()),
            });
        }
        log::info!(
            "[Classifier] Loaded {} prototypes from {:?}",
            model.prototypes.len(),
            path.as_ref()
        );
        Ok(model)
    }
}

/// Nearest-prototype classifier (the trained-model strategy)
#[derive(Debug, Clone)]
pub struct PrototypeClassifier {
    rejection_distance: f32,
    prototypes: Vec<(DrumComponent, [f32; 8])>,
}

impl PrototypeClassifier {
    pub fn new(model: PrototypeModel) -> Self {
        Self {
            rejection_distance: model.rejection_distance.max(f32::EPSILON),
            prototypes: model
                .prototypes
                .iter()
                .map(|p| (p.component, normalised(&p.features)))
                .collect(),
        }
    }

    pub fn built_in() -> Self {
        Self::new(PrototypeModel::built_in())
    }
}

impl PeakClassifier for PrototypeClassifier {
    fn name(&self) -> &'static str {
        "prototype"
    }

    fn classify(&self, features: &PeakFeatures) -> Classification {
        if features.is_silent() {
            return Classification::unknown();
        }

        let query = normalised(features);
        let nearest = self
            .prototypes
            .iter()
            .map(|(component, proto)| {
                let distance = proto
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                (*component, distance)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match nearest {
            Some((component, distance)) if distance <= self.rejection_distance => Classification {
                component: Some(component),
                confidence: (1.0 - distance / self.rejection_distance).clamp(0.0, 1.0),
            },
            _ => Classification::unknown(),
        }
    }
}

/// 0 below `lo`, 1 above `hi`, linear between
fn rise(value: f32, lo: f32, hi: f32) -> f32 {
    if hi <= lo {
        return if value >= hi { 1.0 } else { 0.0 };
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn fall(value: f32, lo: f32, hi: f32) -> f32 {
    1.0 - rise(value, lo, hi)
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;

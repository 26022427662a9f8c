// Analysis module - offline DSP stages of chart generation
//
// Every stage here is a pure computation over its inputs; staging,
// cancellation and timing live in `crate::generation`.
//
// Pipeline:
// - OnsetDetector: spectral flux envelope, adaptive threshold, peaks with features
// - TempoEstimator: BPM and ambiguity from inter-peak intervals
// - Quantizer: peaks snapped onto a beat-subdivision grid
// - LaneAssigner: classifier + layout table -> hit objects
// - ConfidenceScorer: aggregate trust score and issue tags

pub mod classifier;
pub mod confidence;
pub mod features;
pub mod lanes;
pub mod onset;
pub mod quantizer;
pub mod tempo;

pub use classifier::{DrumComponent, PeakClassifier};
pub use confidence::{ConfidenceScorer, DetectionStats, IssueTag};
pub use lanes::{LaneAssigner, LaneLayout};
pub use onset::{OnsetAnalysis, OnsetDetector, Peak};
pub use quantizer::{QuantizationGrid, QuantizedPeak, Quantizer};
pub use tempo::{TempoEstimate, TempoEstimator};

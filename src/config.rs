//! Configuration management for chart generation tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling fast iteration without recompilation. Onset detection, tempo
//! estimation, quantization, lane assignment, confidence scoring and
//! coordinator timing can all be adjusted via the config file.
//!
//! Configuration is resolved once, before a run starts. The pipeline never
//! re-reads it mid-run.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::quantizer::QuantizationGrid;
use crate::error::GenerationError;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub onset_detection: OnsetDetectionConfig,
    pub tempo: TempoConfig,
    pub quantization: QuantizationConfig,
    pub lanes: LaneConfig,
    pub confidence: ConfidenceConfig,
    pub generation: GenerationConfig,
}

/// Onset detection algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetDetectionConfig {
    /// FFT window size in samples
    pub window_size: usize,
    /// Hop size for overlapping windows
    pub hop_size: usize,
    /// Length of the trailing window used for the moving mean threshold
    pub threshold_window_ms: f32,
    /// Threshold multiplier at sensitivity 100
    pub min_multiplier: f32,
    /// Threshold multiplier at sensitivity 0
    pub max_multiplier: f32,
    /// Threshold never drops below this fraction of the loudest flux frame
    pub global_floor_ratio: f32,
    /// Minimum separation between two peaks
    pub refractory_ms: f32,
    /// Energy/threshold ratio that maps to confidence 1.0
    pub confidence_ratio_ceiling: f32,
    /// Window size used for per-peak spectral features
    pub feature_window_size: usize,
    /// Frames processed between two cancellation checks
    pub cancel_check_frames: usize,
}

impl Default for OnsetDetectionConfig {
    fn default() -> Self {
        Self {
            window_size: 1024,
            hop_size: 256,
            threshold_window_ms: 250.0,
            min_multiplier: 1.3,
            max_multiplier: 4.0,
            global_floor_ratio: 0.05,
            refractory_ms: 30.0,
            confidence_ratio_ceiling: 4.0,
            feature_window_size: 1024,
            cancel_check_frames: 512,
        }
    }
}

/// Tempo estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// Lower bound of the folded BPM range (inclusive)
    pub min_bpm: f32,
    /// Upper bound of the folded BPM range (exclusive)
    pub max_bpm: f32,
    /// BPM reported when there is not enough evidence
    pub default_bpm: f32,
    /// Number of following peaks each peak is paired with
    pub max_span: usize,
    /// Candidates within this distance of the winning bucket form its cluster
    pub cluster_radius_bpm: f32,
    /// Relative gap between the best and runner-up hypotheses below which
    /// ambiguity starts rising
    pub ambiguity_margin: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 220.0,
            default_bpm: 120.0,
            max_span: 4,
            cluster_radius_bpm: 2.0,
            ambiguity_margin: 0.5,
        }
    }
}

/// Grid quantization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationConfig {
    /// Snap errors above this fraction of a grid step are flagged low-confidence
    pub max_snap_error_fraction: f64,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            max_snap_error_fraction: 0.25,
        }
    }
}

/// Which lane layout drafts are generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneLayoutKind {
    SevenLane,
    FourLane,
}

/// Which peak classification strategy the lane assigner uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Heuristic,
    Prototype,
}

/// Lane assignment parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub layout: LaneLayoutKind,
    pub classifier: ClassifierKind,
    /// Optional JSON file with trained prototypes (built-in set otherwise)
    pub prototype_model_path: Option<PathBuf>,
    /// Window used to measure local hit density around each peak
    pub density_window_ms: f64,
    /// Hits per second at or below which a peak is in the sparse tier
    pub sparse_max_per_second: f64,
    /// Hits per second at or above which a peak is in the dense tier
    pub dense_min_per_second: f64,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            layout: LaneLayoutKind::SevenLane,
            classifier: ClassifierKind::Heuristic,
            prototype_model_path: None,
            density_window_ms: 1000.0,
            sparse_max_per_second: 2.0,
            dense_min_per_second: 6.0,
        }
    }
}

/// Confidence scoring weights and warning thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub coverage_weight: f32,
    pub error_weight: f32,
    pub ambiguity_weight: f32,
    /// Detection density (peaks per second) at which the density gate opens fully
    pub min_peaks_per_second: f32,
    /// Ambiguity at or above which "tempo ambiguous" is reported
    pub tempo_ambiguous_threshold: f32,
    /// Mean snap error, as a fraction of a grid step, above which
    /// "high snap error" is reported
    pub high_snap_error_fraction: f32,
    /// Coverage below which "low quantization coverage" is reported
    pub low_coverage_threshold: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            coverage_weight: 0.5,
            error_weight: 0.3,
            ambiguity_weight: 0.2,
            min_peaks_per_second: 0.5,
            tempo_ambiguous_threshold: 0.5,
            high_snap_error_fraction: 0.2,
            low_coverage_threshold: 0.7,
        }
    }
}

/// Coordinator timing and caller-side defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Sensitivity used when the caller does not provide one
    pub default_sensitivity: u8,
    /// Grid used when the caller does not provide one
    pub default_grid: QuantizationGrid,
    /// Interval between heartbeats while a stage is running
    pub heartbeat_interval_ms: u64,
    /// Silence after which a caller should consider a run stalled
    pub stall_threshold_ms: u64,
    /// Capacity of the per-run progress channel
    pub progress_channel_capacity: usize,
    /// Maximum number of diagnostic lines kept per run
    pub run_log_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_sensitivity: 50,
            default_grid: QuantizationGrid::Sixteenth,
            heartbeat_interval_ms: 250,
            stall_threshold_ms: 5_000,
            progress_channel_capacity: 64,
            run_log_capacity: 512,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// Loaded configuration, or the defaults when the file is missing or the
    /// JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from JSON file, reporting parse failures
    ///
    /// Used when the caller explicitly named a config file and silently
    /// falling back to defaults would hide a typo.
    pub fn try_load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GenerationError> {
        let contents =
            fs::read_to_string(&path).map_err(|err| GenerationError::ConfigInvalid {
                reason: format!("reading {}: {}", path.as_ref().display(), err),
            })?;
        serde_json::from_str(&contents).map_err(|err| GenerationError::ConfigInvalid {
            reason: format!("parsing {}: {}", path.as_ref().display(), err),
        })
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/drumchart_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.onset_detection.window_size, 1024);
        assert_eq!(config.onset_detection.hop_size, 256);
        assert_eq!(config.tempo.default_bpm, 120.0);
        assert_eq!(config.generation.default_sensitivity, 50);
        assert_eq!(config.generation.default_grid, QuantizationGrid::Sixteenth);
        assert_eq!(config.lanes.layout, LaneLayoutKind::SevenLane);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            parsed.onset_detection.refractory_ms,
            config.onset_detection.refractory_ms
        );
        assert_eq!(parsed.lanes.classifier, config.lanes.classifier);
    }

    #[test]
    fn test_partial_json_uses_section_defaults() {
        let json = r#"{ "tempo": { "default_bpm": 100.0 }, "lanes": { "layout": "four_lane" } }"#;
        let parsed: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.tempo.default_bpm, 100.0);
        assert_eq!(parsed.tempo.max_span, 4);
        assert_eq!(parsed.lanes.layout, LaneLayoutKind::FourLane);
        assert_eq!(parsed.generation.heartbeat_interval_ms, 250);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/drumchart.json");
        assert_eq!(config.quantization.max_snap_error_fraction, 0.25);
    }

    #[test]
    fn test_try_load_reports_missing_file() {
        let result = AppConfig::try_load_from_file("/nonexistent/drumchart.json");
        assert!(matches!(result, Err(GenerationError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_shipped_asset_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/drumchart_config.json");
        let shipped = AppConfig::try_load_from_file(&path).unwrap();
        assert_eq!(
            serde_json::to_value(&shipped).unwrap(),
            serde_json::to_value(AppConfig::default()).unwrap()
        );
    }
}

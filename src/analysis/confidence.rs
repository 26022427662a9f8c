// Confidence scorer - one trust score plus issue tags for a generated draft
//
// Sub-scores are normalised to [0, 1] and combined with configurable weights,
// then gated by detection density. Issue tags are thresholds on the same
// sub-scores, so a tag never disagrees with the aggregate it explains.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::quantizer::QuantizationGrid;
use crate::config::ConfidenceConfig;

/// Largest possible snap error as a fraction of a grid step
const MAX_ERROR_FRACTION: f32 = 0.5;

/// Qualitative problem attached to an otherwise successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueTag {
    TempoAmbiguous,
    LowDetectionDensity,
    HighSnapError,
    LowQuantizationCoverage,
}

impl IssueTag {
    /// Human-readable warning text
    pub fn message(&self) -> &'static str {
        match self {
            IssueTag::TempoAmbiguous => "tempo ambiguous",
            IssueTag::LowDetectionDensity => "low detection density",
            IssueTag::HighSnapError => "high snap error",
            IssueTag::LowQuantizationCoverage => "low quantization coverage",
        }
    }
}

impl fmt::Display for IssueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Raw measurements the score is computed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInputs {
    pub peak_count: usize,
    pub duration_seconds: f64,
    /// Fraction of peaks snapped within the error bound
    pub coverage: f64,
    pub mean_snap_error_ms: f64,
    /// Grid step the mean error is measured against
    pub step_ms: f64,
    pub tempo_ambiguity: f32,
}

impl ConfidenceInputs {
    pub fn peaks_per_second(&self) -> f32 {
        if self.duration_seconds > 0.0 {
            (self.peak_count as f64 / self.duration_seconds) as f32
        } else {
            0.0
        }
    }

    /// Mean snap error relative to the grid step
    pub fn error_fraction(&self) -> f32 {
        if self.step_ms > 0.0 {
            (self.mean_snap_error_ms / self.step_ms) as f32
        } else {
            0.0
        }
    }
}

/// Normalised components of the aggregate score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    /// 0 with no peaks, 1 once density reaches the configured minimum
    pub density_gate: f32,
    pub coverage: f32,
    /// 1 for perfect snapping, 0 at half a step of mean error
    pub error: f32,
    /// 1 - tempo ambiguity
    pub tempo: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAssessment {
    pub score: f32,
    pub sub_scores: SubScores,
    /// Sorted, no duplicates
    pub issues: Vec<IssueTag>,
}

/// Read-only snapshot of one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub peak_count: usize,
    pub duration_seconds: f64,
    pub bpm: f64,
    pub tempo_ambiguity: f32,
    pub coverage: f64,
    pub mean_snap_error_ms: f64,
    pub confidence: f32,
    pub sensitivity: u8,
    pub grid: QuantizationGrid,
}

impl DetectionStats {
    pub fn new(
        inputs: &ConfidenceInputs,
        assessment: &ConfidenceAssessment,
        bpm: f64,
        sensitivity: u8,
        grid: QuantizationGrid,
    ) -> Self {
        Self {
            peak_count: inputs.peak_count,
            duration_seconds: inputs.duration_seconds,
            bpm,
            tempo_ambiguity: inputs.tempo_ambiguity,
            coverage: inputs.coverage,
            mean_snap_error_ms: inputs.mean_snap_error_ms,
            confidence: assessment.score,
            sensitivity,
            grid,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    config: ConfidenceConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    pub fn sub_scores(&self, inputs: &ConfidenceInputs) -> SubScores {
        let density = inputs.peaks_per_second();
        let density_gate = if inputs.peak_count == 0 {
            0.0
        } else if self.config.min_peaks_per_second <= 0.0 {
            1.0
        } else {
            (density / self.config.min_peaks_per_second).min(1.0)
        };

        SubScores {
            density_gate,
            coverage: (inputs.coverage as f32).clamp(0.0, 1.0),
            error: 1.0 - (inputs.error_fraction() / MAX_ERROR_FRACTION).clamp(0.0, 1.0),
            tempo: 1.0 - inputs.tempo_ambiguity.clamp(0.0, 1.0),
        }
    }

    /// Score in [0, 1] and issue tags for `inputs`
    pub fn assess(&self, inputs: &ConfidenceInputs) -> ConfidenceAssessment {
        let sub = self.sub_scores(inputs);

        let weights = [
            self.config.coverage_weight.max(0.0),
            self.config.error_weight.max(0.0),
            self.config.ambiguity_weight.max(0.0),
        ];
        let weight_sum: f32 = weights.iter().sum();
        let blended = if weight_sum > 0.0 {
            (weights[0] * sub.coverage + weights[1] * sub.error + weights[2] * sub.tempo)
                / weight_sum
        } else {
            0.0
        };
        let score = (sub.density_gate * blended).clamp(0.0, 1.0);

        let mut issues = Vec::new();
        if inputs.tempo_ambiguity >= self.config.tempo_ambiguous_threshold {
            issues.push(IssueTag::TempoAmbiguous);
        }
        if inputs.peaks_per_second() < self.config.min_peaks_per_second || inputs.peak_count == 0 {
            issues.push(IssueTag::LowDetectionDensity);
        }
        // Grid-fit tags only mean something when something was snapped
        if inputs.peak_count > 0 {
            if inputs.error_fraction() > self.config.high_snap_error_fraction {
                issues.push(IssueTag::HighSnapError);
            }
            if sub.coverage < self.config.low_coverage_threshold {
                issues.push(IssueTag::LowQuantizationCoverage);
            }
        }
        issues.sort();

        log::debug!(
            "[ConfidenceScorer] score={:.3} gate={:.2} coverage={:.2} error={:.2} tempo={:.2} issues={:?}",
            score,
            sub.density_gate,
            sub.coverage,
            sub.error,
            sub.tempo,
            issues
        );

        ConfidenceAssessment {
            score,
            sub_scores: sub,
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_inputs() -> ConfidenceInputs {
        ConfidenceInputs {
            peak_count: 20,
            duration_seconds: 10.0,
            coverage: 1.0,
            mean_snap_error_ms: 1.0,
            step_ms: 125.0,
            tempo_ambiguity: 0.0,
        }
    }

    #[test]
    fn test_clean_run_scores_high_without_issues() {
        let assessment = ConfidenceScorer::default().assess(&clean_inputs());
        assert!(assessment.score > 0.95, "score {}", assessment.score);
        assert!(assessment.issues.is_empty());
    }

    #[test]
    fn test_no_peaks_scores_zero() {
        let inputs = ConfidenceInputs {
            peak_count: 0,
            coverage: 0.0,
            mean_snap_error_ms: 0.0,
            tempo_ambiguity: 1.0,
            ..clean_inputs()
        };
        let assessment = ConfidenceScorer::default().assess(&inputs);
        assert_eq!(assessment.score, 0.0);
        assert_eq!(
            assessment.issues,
            vec![IssueTag::TempoAmbiguous, IssueTag::LowDetectionDensity]
        );
    }

    #[test]
    fn test_monotone_in_coverage() {
        let scorer = ConfidenceScorer::default();
        let mut previous = -1.0;
        for step in 0..=20 {
            let inputs = ConfidenceInputs {
                coverage: step as f64 / 20.0,
                mean_snap_error_ms: 20.0,
                tempo_ambiguity: 0.4,
                ..clean_inputs()
            };
            let score = scorer.assess(&inputs).score;
            assert!(score >= previous, "coverage {} dropped score", inputs.coverage);
            previous = score;
        }
    }

    #[test]
    fn test_sparse_detection_gates_score() {
        let dense = ConfidenceScorer::default().assess(&clean_inputs()).score;
        let sparse = ConfidenceScorer::default().assess(&ConfidenceInputs {
            peak_count: 2,
            ..clean_inputs()
        });
        assert!(sparse.score < dense * 0.5);
        assert!(sparse.issues.contains(&IssueTag::LowDetectionDensity));
    }

    #[test]
    fn test_tags_follow_sub_scores() {
        let inputs = ConfidenceInputs {
            coverage: 0.5,
            mean_snap_error_ms: 40.0,
            tempo_ambiguity: 0.9,
            ..clean_inputs()
        };
        let assessment = ConfidenceScorer::default().assess(&inputs);
        assert_eq!(
            assessment.issues,
            vec![
                IssueTag::TempoAmbiguous,
                IssueTag::HighSnapError,
                IssueTag::LowQuantizationCoverage
            ]
        );
        assert!((assessment.sub_scores.error - (1.0 - 0.32 / 0.5)).abs() < 1e-4);
    }

    #[test]
    fn test_weights_are_configurable() {
        let coverage_only = ConfidenceScorer::new(ConfidenceConfig {
            coverage_weight: 1.0,
            error_weight: 0.0,
            ambiguity_weight: 0.0,
            ..ConfidenceConfig::default()
        });
        let inputs = ConfidenceInputs {
            coverage: 0.6,
            tempo_ambiguity: 1.0,
            ..clean_inputs()
        };
        assert!((coverage_only.assess(&inputs).score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_issue_messages() {
        assert_eq!(IssueTag::LowDetectionDensity.to_string(), "low detection density");
        assert_eq!(
            serde_json::to_string(&IssueTag::HighSnapError).unwrap(),
            "\"high_snap_error\""
        );
    }
}

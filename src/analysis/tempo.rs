//! Tempo Estimator - BPM from inter-peak intervals
//!
//! Every peak is paired with its next `max_span` peaks. Each pair's interval
//! is divided by the span (two intervals of 250 ms across three peaks vote for
//! a 250 ms period), converted to BPM and folded by octaves into
//! `[min_bpm, max_bpm)`. Votes are weighted by the pair's mean confidence
//! divided by the span and accumulated into a 1-BPM histogram.
//!
//! The winning cluster (bucket ± `cluster_radius_bpm`) gives the estimate as
//! a weighted mean of its votes. Ambiguity measures how close the strongest
//! non-overlapping competitor comes to the winner.

use serde::{Deserialize, Serialize};

use crate::analysis::onset::Peak;
use crate::config::TempoConfig;

/// Estimated tempo and how much a competing tempo undermines it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    /// Beats per minute (> 0)
    pub bpm: f64,
    /// 0 = one clear tempo, 1 = no usable evidence or a tie
    pub ambiguity: f32,
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    bpm: f64,
    weight: f64,
}

/// Histogram-based tempo estimator
#[derive(Debug, Clone)]
pub struct TempoEstimator {
    config: TempoConfig,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig) -> Self {
        Self { config }
    }

    /// Estimate used when there is nothing to measure
    pub fn fallback(&self) -> TempoEstimate {
        TempoEstimate {
            bpm: f64::from(self.config.default_bpm),
            ambiguity: 1.0,
        }
    }

    /// Estimate the tempo of time-ordered peaks
    ///
    /// Fewer than two peaks, or no interval that folds into range, returns
    /// [`fallback`](Self::fallback).
    pub fn estimate(&self, peaks: &[Peak]) -> TempoEstimate {
        if peaks.len() < 2 {
            log::debug!(
                "[TempoEstimator] {} peaks, using default {} BPM",
                peaks.len(),
                self.config.default_bpm
            );
            return self.fallback();
        }

        let votes = self.collect_votes(peaks);
        if votes.is_empty() {
            return self.fallback();
        }

        let min_bpm = f64::from(self.config.min_bpm);
        let bucket_count = (f64::from(self.config.max_bpm) - min_bpm).ceil().max(1.0) as usize;
        let mut histogram = vec![0.0_f64; bucket_count];
        for vote in &votes {
            let bucket = ((vote.bpm - min_bpm).floor() as usize).min(bucket_count - 1);
            histogram[bucket] += vote.weight;
        }

        let radius = self.config.cluster_radius_bpm.max(0.0).round() as usize;
        let cluster_scores: Vec<f64> = (0..bucket_count)
            .map(|b| {
                let lo = b.saturating_sub(radius);
                let hi = (b + radius).min(bucket_count - 1);
                histogram[lo..=hi].iter().sum()
            })
            .collect();

        // Lowest bucket wins ties so the result is stable
        let (best_bucket, best_score) = cluster_scores.iter().copied().enumerate().fold(
            (0, 0.0_f64),
            |best, (b, score)| if score > best.1 { (b, score) } else { best },
        );

        if best_score <= 0.0 {
            return self.fallback();
        }

        let second_score = cluster_scores
            .iter()
            .enumerate()
            .filter(|(b, _)| b.abs_diff(best_bucket) > 2 * radius)
            .map(|(_, score)| *score)
            .fold(0.0_f64, f64::max);

        let centre = min_bpm + best_bucket as f64 + 0.5;
        let reach = radius as f64 + 0.5;
        let (sum_bpm, sum_weight) = votes
            .iter()
            .filter(|v| (v.bpm - centre).abs() <= reach)
            .fold((0.0, 0.0), |(sb, sw), v| (sb + v.bpm * v.weight, sw + v.weight));
        let bpm = if sum_weight > 0.0 {
            sum_bpm / sum_weight
        } else {
            centre
        };

        let margin = f64::from(self.config.ambiguity_margin).max(f64::EPSILON);
        let separation = ((1.0 - second_score / best_score) / margin).clamp(0.0, 1.0);
        let ambiguity = (1.0 - separation) as f32;

        log::debug!(
            "[TempoEstimator] {} votes, estimate {:.2} BPM (ambiguity {:.2})",
            votes.len(),
            bpm,
            ambiguity
        );

        TempoEstimate { bpm, ambiguity }
    }

    fn collect_votes(&self, peaks: &[Peak]) -> Vec<Vote> {
        let max_span = self.config.max_span.max(1);
        let mut votes = Vec::new();

        for (i, first) in peaks.iter().enumerate() {
            for span in 1..=max_span {
                let Some(second) = peaks.get(i + span) else {
                    break;
                };
                let interval = (second.time_seconds - first.time_seconds) / span as f64;
                if interval <= 0.0 {
                    continue;
                }
                if let Some(bpm) = self.fold(60.0 / interval) {
                    let confidence = f64::from(first.confidence + second.confidence) / 2.0;
                    votes.push(Vote {
                        bpm,
                        weight: confidence / span as f64,
                    });
                }
            }
        }

        votes
    }

    /// Fold `bpm` by octaves into `[min_bpm, max_bpm)`
    fn fold(&self, mut bpm: f64) -> Option<f64> {
        let min_bpm = f64::from(self.config.min_bpm);
        let max_bpm = f64::from(self.config.max_bpm);
        if !bpm.is_finite() || bpm <= 0.0 || min_bpm <= 0.0 || max_bpm <= min_bpm {
            return None;
        }

        for _ in 0..16 {
            if bpm < min_bpm {
                bpm *= 2.0;
            } else if bpm >= max_bpm {
                bpm /= 2.0;
            } else {
                return Some(bpm);
            }
        }
        None
    }
}

// Lane assigner - quantized peaks to lane-assigned hit objects
//
// Each peak is classified by the configured `PeakClassifier`, mapped to a lane
// through the layout's fixed component table and turned into a `HitObject`.
// Peaks the classifier cannot place take the most common component of their
// density tier so no hit is left without a lane.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analysis::classifier::{
    DrumComponent, HeuristicClassifier, InstrumentFamily, PeakClassifier, PrototypeClassifier,
    PrototypeModel,
};
use crate::analysis::quantizer::QuantizedPeak;
use crate::chart::HitObject;
use crate::config::{ClassifierKind, LaneConfig, LaneLayoutKind};
use crate::error::GenerationError;

/// Fixed component-to-lane table for a drum kit layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneLayout {
    kind: LaneLayoutKind,
}

impl LaneLayout {
    pub fn new(kind: LaneLayoutKind) -> Self {
        Self { kind }
    }

    pub fn seven_lane() -> Self {
        Self::new(LaneLayoutKind::SevenLane)
    }

    pub fn four_lane() -> Self {
        Self::new(LaneLayoutKind::FourLane)
    }

    pub fn kind(&self) -> LaneLayoutKind {
        self.kind
    }

    pub fn lane_count(&self) -> usize {
        match self.kind {
            LaneLayoutKind::SevenLane => 7,
            LaneLayoutKind::FourLane => 4,
        }
    }

    /// Lane index for a component
    ///
    /// Seven lanes, left to right: crash, hi-hat, snare, kick, high tom,
    /// low tom, ride. Four lanes: cymbals, snare, kick, toms.
    pub fn lane_for(&self, component: DrumComponent) -> usize {
        match self.kind {
            LaneLayoutKind::SevenLane => match component {
                DrumComponent::Crash => 0,
                DrumComponent::HiHatClosed | DrumComponent::HiHatOpen => 1,
                DrumComponent::Snare => 2,
                DrumComponent::Kick => 3,
                DrumComponent::TomHigh => 4,
                DrumComponent::TomLow => 5,
                DrumComponent::Ride => 6,
            },
            LaneLayoutKind::FourLane => match component {
                DrumComponent::HiHatClosed
                | DrumComponent::HiHatOpen
                | DrumComponent::Crash
                | DrumComponent::Ride => 0,
                DrumComponent::Snare => 1,
                DrumComponent::Kick => 2,
                DrumComponent::TomHigh | DrumComponent::TomLow => 3,
            },
        }
    }
}

/// Local hit density around a peak
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityTier {
    Sparse,
    Medium,
    Dense,
}

impl DensityTier {
    /// Component used when a tier has no classified peaks at all
    pub fn default_component(&self) -> DrumComponent {
        match self {
            DensityTier::Sparse => DrumComponent::Kick,
            DensityTier::Medium => DrumComponent::Snare,
            DensityTier::Dense => DrumComponent::HiHatClosed,
        }
    }
}

/// Lane-diversity statistics reported alongside the hit objects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneStats {
    /// Hits per lane index
    pub lane_counts: Vec<usize>,
    pub component_counts: BTreeMap<DrumComponent, usize>,
    /// Lane changes between consecutive hits of the same family
    pub family_switches: BTreeMap<InstrumentFamily, usize>,
    /// Lane changes between consecutive hits overall
    pub total_switches: usize,
    pub longest_run: usize,
    pub longest_run_lane: Option<usize>,
    pub distinct_lanes: usize,
    /// Hits whose component came from the density-tier fallback
    pub fallback_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneAssignment {
    pub hit_objects: Vec<HitObject>,
    pub stats: LaneStats,
}

/// Maps quantized peaks to lanes with a classifier chosen at construction
pub struct LaneAssigner {
    layout: LaneLayout,
    classifier: Arc<dyn PeakClassifier>,
    config: LaneConfig,
}

impl std::fmt::Debug for LaneAssigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaneAssigner")
            .field("layout", &self.layout)
            .field("classifier", &self.classifier.name())
            .finish()
    }
}

impl LaneAssigner {
    pub fn new(layout: LaneLayout, classifier: Arc<dyn PeakClassifier>, config: LaneConfig) -> Self {
        Self {
            layout,
            classifier,
            config,
        }
    }

    /// Build the layout and classifier named by `config`
    ///
    /// # Errors
    /// `ConfigInvalid` when a prototype model file is configured but cannot
    /// be loaded.
    pub fn from_config(config: &LaneConfig) -> Result<Self, GenerationError> {
        let classifier: Arc<dyn PeakClassifier> = match config.classifier {
            ClassifierKind::Heuristic => Arc::new(HeuristicClassifier::default()),
            ClassifierKind::Prototype => match &config.prototype_model_path {
                Some(path) => Arc::new(PrototypeClassifier::new(PrototypeModel::load_from_file(
                    path,
                )?)),
                None => Arc::new(PrototypeClassifier::built_in()),
            },
        };
        Ok(Self::new(LaneLayout::new(config.layout), classifier, config.clone()))
    }

    pub fn layout(&self) -> LaneLayout {
        self.layout
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Density tier of every peak, by hits per second within the density window
    pub fn density_tiers(&self, peaks: &[QuantizedPeak]) -> Vec<DensityTier> {
        let half_window = self.config.density_window_ms.max(1.0) / 2.0;
        let window_seconds = self.config.density_window_ms.max(1.0) / 1000.0;
        let times: Vec<f64> = peaks.iter().map(|p| p.peak.time_ms()).collect();

        times
            .iter()
            .map(|&t| {
                let count = times
                    .iter()
                    .filter(|&&other| (other - t).abs() <= half_window)
                    .count();
                let rate = count as f64 / window_seconds;
                if rate <= self.config.sparse_max_per_second {
                    DensityTier::Sparse
                } else if rate >= self.config.dense_min_per_second {
                    DensityTier::Dense
                } else {
                    DensityTier::Medium
                }
            })
            .collect()
    }

    /// Classify, place and summarise every peak
    ///
    /// One hit object per peak, in input order.
    pub fn assign(&self, peaks: &[QuantizedPeak]) -> LaneAssignment {
        if peaks.is_empty() {
            return LaneAssignment {
                hit_objects: Vec::new(),
                stats: LaneStats {
                    lane_counts: vec![0; self.layout.lane_count()],
                    ..Default::default()
                },
            };
        }

        let tiers = self.density_tiers(peaks);
        let classified: Vec<Option<DrumComponent>> = peaks
            .iter()
            .map(|p| self.classifier.classify(&p.peak.features).component)
            .collect();

        // Most common classified component per tier; ties go to the earlier component
        let mut tier_counts: BTreeMap<DensityTier, BTreeMap<DrumComponent, usize>> = BTreeMap::new();
        for (tier, component) in tiers.iter().zip(&classified) {
            if let Some(component) = component {
                *tier_counts
                    .entry(*tier)
                    .or_default()
                    .entry(*component)
                    .or_default() += 1;
            }
        }
        let fallback_for = |tier: DensityTier| -> DrumComponent {
            tier_counts
                .get(&tier)
                .and_then(|counts| {
                    counts
                        .iter()
                        .fold(None, |best: Option<(DrumComponent, usize)>, (&c, &n)| match best {
                            Some((_, best_n)) if best_n >= n => best,
                            _ => Some((c, n)),
                        })
                        .map(|(c, _)| c)
                })
                .unwrap_or_else(|| tier.default_component())
        };

        let max_energy = peaks
            .iter()
            .map(|p| p.peak.energy)
            .fold(0.0f32, f32::max);

        let mut fallback_count = 0;
        let hit_objects: Vec<HitObject> = peaks
            .iter()
            .zip(tiers.iter().zip(&classified))
            .map(|(peak, (tier, component))| {
                let component = component.unwrap_or_else(|| {
                    fallback_count += 1;
                    fallback_for(*tier)
                });
                HitObject {
                    time_ms: (peak.snapped_time_ms.round() as i64).max(0),
                    lane: self.layout.lane_for(component),
                    component,
                    velocity: velocity(peak, max_energy),
                    duration_ms: None,
                }
            })
            .collect();

        if fallback_count > 0 {
            log::debug!(
                "[LaneAssigner] {} of {} peaks used the density-tier fallback",
                fallback_count,
                peaks.len()
            );
        }

        let mut stats = lane_stats(&hit_objects, self.layout.lane_count());
        stats.fallback_count = fallback_count;
        LaneAssignment { hit_objects, stats }
    }
}

/// Relative strength: square root of energy against the loudest peak
fn velocity(peak: &QuantizedPeak, max_energy: f32) -> f32 {
    if max_energy > 0.0 {
        (peak.peak.energy / max_energy).max(0.0).sqrt().clamp(0.0, 1.0)
    } else {
        peak.peak.confidence.clamp(0.0, 1.0)
    }
}

/// Lane diversity over hits in time order
pub fn lane_stats(hits: &[HitObject], lane_count: usize) -> LaneStats {
    let mut stats = LaneStats {
        lane_counts: vec![0; lane_count],
        ..Default::default()
    };

    let mut last_lane_by_family: BTreeMap<InstrumentFamily, usize> = BTreeMap::new();
    let mut run_lane = None;
    let mut run_len = 0;

    for hit in hits {
        if let Some(count) = stats.lane_counts.get_mut(hit.lane) {
            *count += 1;
        }
        *stats.component_counts.entry(hit.component).or_default() += 1;

        let family = hit.component.family();
        if let Some(previous) = last_lane_by_family.insert(family, hit.lane) {
            if previous != hit.lane {
                *stats.family_switches.entry(family).or_default() += 1;
            }
        }

        if run_lane == Some(hit.lane) {
            run_len += 1;
        } else {
            if run_lane.is_some() {
                stats.total_switches += 1;
            }
            run_lane = Some(hit.lane);
            run_len = 1;
        }
        if run_len > stats.longest_run {
            stats.longest_run = run_len;
            stats.longest_run_lane = Some(hit.lane);
        }
    }

    stats.distinct_lanes = stats.lane_counts.iter().filter(|&&n| n > 0).count();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::Classification;
    use crate::analysis::features::PeakFeatures;
    use crate::analysis::onset::Peak;

    /// Classifies by the peak's zero-crossing rate, which tests use as a tag
    struct TaggedClassifier;

    impl PeakClassifier for TaggedClassifier {
        fn name(&self) -> &'static str {
            "tagged"
        }

        fn classify(&self, features: &PeakFeatures) -> Classification {
            let component = DrumComponent::ALL
                .iter()
                .copied()
                .find(|c| (*c as usize) as f32 == features.zcr);
            Classification {
                component,
                confidence: if component.is_some() { 1.0 } else { 0.0 },
            }
        }
    }

    fn peak(time_ms: f64, tag: Option<DrumComponent>, energy: f32) -> QuantizedPeak {
        QuantizedPeak {
            peak: Peak {
                time_seconds: time_ms / 1000.0,
                confidence: 0.9,
                energy,
                threshold: 1.0,
                features: PeakFeatures {
                    zcr: tag.map(|c| c as usize as f32).unwrap_or(-1.0),
                    ..Default::default()
                },
            },
            snapped_time_ms: time_ms,
            snap_error_ms: 0.0,
            grid_divisor: 4,
            grid_index: 0,
            low_confidence: false,
        }
    }

    fn assigner(layout: LaneLayout) -> LaneAssigner {
        LaneAssigner::new(layout, Arc::new(TaggedClassifier), LaneConfig::default())
    }

    #[test]
    fn test_layout_tables_stay_in_bounds() {
        for layout in [LaneLayout::seven_lane(), LaneLayout::four_lane()] {
            for component in DrumComponent::ALL {
                assert!(layout.lane_for(component) < layout.lane_count());
            }
        }
        assert_eq!(LaneLayout::seven_lane().lane_for(DrumComponent::Kick), 3);
        assert_eq!(LaneLayout::four_lane().lane_for(DrumComponent::Ride), 0);
    }

    #[test]
    fn test_one_hit_per_peak_in_layout_lanes() {
        let peaks = vec![
            peak(0.0, Some(DrumComponent::Kick), 4.0),
            peak(500.0, Some(DrumComponent::Snare), 1.0),
            peak(1000.0, Some(DrumComponent::Crash), 2.0),
        ];
        let result = assigner(LaneLayout::seven_lane()).assign(&peaks);

        let lanes: Vec<usize> = result.hit_objects.iter().map(|h| h.lane).collect();
        assert_eq!(lanes, vec![3, 2, 0]);
        assert_eq!(result.hit_objects[0].velocity, 1.0);
        assert!((result.hit_objects[1].velocity - 0.5).abs() < 1e-6);
        assert_eq!(result.stats.distinct_lanes, 3);
        assert_eq!(result.stats.fallback_count, 0);
    }

    #[test]
    fn test_unknown_takes_most_common_in_tier() {
        // Five hits within one second: medium tier, snare dominant
        let peaks = vec![
            peak(0.0, Some(DrumComponent::Snare), 1.0),
            peak(100.0, Some(DrumComponent::Snare), 1.0),
            peak(200.0, None, 1.0),
            peak(300.0, Some(DrumComponent::Kick), 1.0),
            peak(400.0, Some(DrumComponent::Snare), 1.0),
        ];
        let a = assigner(LaneLayout::seven_lane());
        assert!(a
            .density_tiers(&peaks)
            .iter()
            .all(|t| *t == DensityTier::Medium));

        let result = a.assign(&peaks);
        assert_eq!(result.hit_objects[2].component, DrumComponent::Snare);
        assert_eq!(result.stats.fallback_count, 1);
    }

    #[test]
    fn test_unknown_in_empty_tier_uses_tier_default() {
        let peaks = vec![peak(0.0, None, 1.0), peak(5000.0, None, 1.0)];
        let result = assigner(LaneLayout::four_lane()).assign(&peaks);
        assert!(result
            .hit_objects
            .iter()
            .all(|h| h.component == DrumComponent::Kick && h.lane == 2));
        assert_eq!(result.stats.fallback_count, 2);
    }

    #[test]
    fn test_dense_tier_detection() {
        let peaks: Vec<QuantizedPeak> = (0..16)
            .map(|i| peak(i as f64 * 62.5, Some(DrumComponent::HiHatClosed), 1.0))
            .collect();
        let tiers = assigner(LaneLayout::seven_lane()).density_tiers(&peaks);
        assert!(tiers.iter().all(|t| *t == DensityTier::Dense));
    }

    #[test]
    fn test_lane_stats_runs_and_family_switches() {
        let peaks = vec![
            peak(0.0, Some(DrumComponent::TomHigh), 1.0),
            peak(250.0, Some(DrumComponent::TomLow), 1.0),
            peak(500.0, Some(DrumComponent::Kick), 1.0),
            peak(750.0, Some(DrumComponent::Kick), 1.0),
            peak(1000.0, Some(DrumComponent::Kick), 1.0),
            peak(1250.0, Some(DrumComponent::TomHigh), 1.0),
        ];
        let stats = assigner(LaneLayout::seven_lane()).assign(&peaks).stats;

        assert_eq!(stats.longest_run, 3);
        assert_eq!(stats.longest_run_lane, Some(3));
        assert_eq!(stats.total_switches, 3);
        assert_eq!(stats.family_switches.get(&InstrumentFamily::Tom), Some(&2));
        assert_eq!(stats.family_switches.get(&InstrumentFamily::Kick), None);
        assert_eq!(stats.lane_counts, vec![0, 0, 0, 3, 2, 1, 0]);
    }

    #[test]
    fn test_empty_input() {
        let result = assigner(LaneLayout::seven_lane()).assign(&[]);
        assert!(result.hit_objects.is_empty());
        assert_eq!(result.stats.lane_counts.len(), 7);
        assert_eq!(result.stats.longest_run, 0);
    }

    #[test]
    fn test_from_config_selects_classifier() {
        let heuristic = LaneAssigner::from_config(&LaneConfig::default()).unwrap();
        assert_eq!(heuristic.classifier_name(), "heuristic");

        let prototype = LaneAssigner::from_config(&LaneConfig {
            classifier: ClassifierKind::Prototype,
            layout: LaneLayoutKind::FourLane,
            ..LaneConfig::default()
        })
        .unwrap();
        assert_eq!(prototype.classifier_name(), "prototype");
        assert_eq!(prototype.layout().lane_count(), 4);
    }

    #[test]
    fn test_from_config_reports_missing_model() {
        let result = LaneAssigner::from_config(&LaneConfig {
            classifier: ClassifierKind::Prototype,
            prototype_model_path: Some("/nonexistent/prototypes.json".into()),
            ..LaneConfig::default()
        });
        assert!(matches!(result, Err(GenerationError::ConfigInvalid { .. })));
    }
}

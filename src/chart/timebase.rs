// Timebase synchroniser - reconciles a chart draft with forced timing hints
//
// Hit object times are absolute milliseconds, so a BPM change only touches
// timing metadata. An offset change moves every timed entity by the same delta
// or leaves the draft untouched.

use serde::{Deserialize, Serialize};

use super::{ChartDraft, TimingPoint};

/// Forced-BPM comparisons tolerate this much drift
pub const BPM_TOLERANCE: f64 = 1e-3;

/// Editor snap divisor bounds
pub const MIN_SNAP_DIVISOR: u32 = 1;
pub const MAX_SNAP_DIVISOR: u32 = 48;

/// Optional overrides supplied by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimebaseHints {
    pub forced_bpm: Option<f64>,
    pub forced_offset_seconds: Option<f64>,
    pub forced_step_seconds: Option<f64>,
}

impl TimebaseHints {
    pub fn is_empty(&self) -> bool {
        self.forced_bpm.is_none()
            && self.forced_offset_seconds.is_none()
            && self.forced_step_seconds.is_none()
    }
}

/// What happened to the offset during synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OffsetChange {
    Unchanged,
    /// Every timed entity moved by `delta_ms`
    Shifted { delta_ms: i64 },
    /// The shift would have moved `earliest_ms` below zero; nothing moved
    Rejected { delta_ms: i64, earliest_ms: i64 },
}

/// Report of one synchronisation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub bpm_updated: bool,
    pub offset: OffsetChange,
    /// Divisor derived from a forced step, if any
    pub snap_divisor: Option<u32>,
}

impl SyncOutcome {
    fn unchanged() -> Self {
        Self {
            bpm_updated: false,
            offset: OffsetChange::Unchanged,
            snap_divisor: None,
        }
    }
}

/// Nearest snap divisor for a beat length and step, clamped to 1-48
pub fn snap_divisor_for(beat_length_ms: f64, step_ms: f64) -> u32 {
    if !(beat_length_ms.is_finite() && step_ms.is_finite() && step_ms > 0.0) {
        return MIN_SNAP_DIVISOR;
    }
    let ratio = (beat_length_ms / step_ms).round();
    ratio.clamp(MIN_SNAP_DIVISOR as f64, MAX_SNAP_DIVISOR as f64) as u32
}

/// Applies [`TimebaseHints`] to chart drafts
#[derive(Debug, Clone, Copy, Default)]
pub struct TimebaseSynchroniser;

impl TimebaseSynchroniser {
    pub fn new() -> Self {
        Self
    }

    /// Apply `hints` to `draft`, returning the updated draft and a report
    ///
    /// Hints are assumed validated (finite, positive where required).
    pub fn synchronise(&self, mut draft: ChartDraft, hints: &TimebaseHints) -> (ChartDraft, SyncOutcome) {
        let mut outcome = SyncOutcome::unchanged();

        if let Some(bpm) = hints.forced_bpm {
            if (bpm - draft.timing.bpm).abs() > BPM_TOLERANCE {
                log::info!(
                    "[TimebaseSynchroniser] BPM {:.3} -> {:.3}",
                    draft.timing.bpm,
                    bpm
                );
                draft.timing.bpm = bpm;
                for point in &mut draft.timing.timing_points {
                    point.beat_length_ms = 60_000.0 / bpm;
                }
                outcome.bpm_updated = true;
            }
        }

        if let Some(offset_seconds) = hints.forced_offset_seconds {
            let target_ms = (offset_seconds * 1000.0).round() as i64;
            let delta_ms = target_ms - draft.timing.offset_ms;
            if delta_ms != 0 {
                outcome.offset = shift_all(&mut draft, delta_ms);
            }
        }

        if let (Some(bpm), Some(step_seconds)) = (hints.forced_bpm, hints.forced_step_seconds) {
            let divisor = snap_divisor_for(60_000.0 / bpm, step_seconds * 1000.0);
            draft.editor.snap_divisor = divisor;
            outcome.snap_divisor = Some(divisor);
        }

        anchor_first_timing_point(&mut draft);
        (draft, outcome)
    }
}

/// Shift every timed entity by `delta_ms`, or nothing if any would go negative
fn shift_all(draft: &mut ChartDraft, delta_ms: i64) -> OffsetChange {
    let earliest = draft
        .hit_objects
        .iter()
        .map(|hit| hit.time_ms)
        .chain(draft.bookmarks.iter().copied())
        .min();

    if let Some(earliest_ms) = earliest {
        if earliest_ms + delta_ms < 0 {
            log::warn!(
                "[TimebaseSynchroniser] Offset shift {} ms rejected: entity at {} ms would become negative",
                delta_ms,
                earliest_ms
            );
            return OffsetChange::Rejected {
                delta_ms,
                earliest_ms,
            };
        }
    }

    draft.timing.offset_ms += delta_ms;
    for point in &mut draft.timing.timing_points {
        point.time_ms += delta_ms;
    }
    for hit in &mut draft.hit_objects {
        hit.time_ms += delta_ms;
    }
    for bookmark in &mut draft.bookmarks {
        *bookmark += delta_ms;
    }

    log::info!("[TimebaseSynchroniser] Shifted timebase by {} ms", delta_ms);
    OffsetChange::Shifted { delta_ms }
}

fn anchor_first_timing_point(draft: &mut ChartDraft) {
    let offset_ms = draft.timing.offset_ms;
    match draft.timing.timing_points.first_mut() {
        Some(first) => first.time_ms = offset_ms,
        None => draft
            .timing
            .timing_points
            .push(TimingPoint::new(offset_ms, draft.timing.bpm)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::DrumComponent;
    use crate::chart::{ChartMetadata, HitObject};

    fn hit(time_ms: i64) -> HitObject {
        HitObject {
            time_ms,
            lane: 0,
            component: DrumComponent::Kick,
            velocity: 1.0,
            duration_ms: None,
        }
    }

    fn draft_with(hits: &[i64], bookmarks: &[i64]) -> ChartDraft {
        ChartDraft::new(ChartMetadata::default(), 120.0, 0, 4, 7)
            .with_hit_objects(hits.iter().map(|&t| hit(t)).collect())
            .with_bookmarks(bookmarks.to_vec())
    }

    #[test]
    fn test_forced_offset_shifts_everything() {
        let hints = TimebaseHints {
            forced_offset_seconds: Some(0.05),
            ..Default::default()
        };
        let (draft, outcome) = TimebaseSynchroniser::new().synchronise(draft_with(&[1000], &[]), &hints);

        assert_eq!(outcome.offset, OffsetChange::Shifted { delta_ms: 50 });
        assert_eq!(draft.timing.offset_ms, 50);
        assert_eq!(draft.hit_objects[0].time_ms, 1050);
        assert_eq!(draft.timing.timing_points[0].time_ms, 50);
    }

    #[test]
    fn test_shift_applies_same_delta_to_all_entities() {
        let mut original = draft_with(&[100, 600, 1100], &[0, 2000]);
        original.timing.timing_points.push(TimingPoint::new(4000, 120.0));
        let hints = TimebaseHints {
            forced_offset_seconds: Some(0.25),
            ..Default::default()
        };
        let (draft, _) = TimebaseSynchroniser::new().synchronise(original.clone(), &hints);

        for (before, after) in original.hit_objects.iter().zip(&draft.hit_objects) {
            assert_eq!(after.time_ms - before.time_ms, 250);
        }
        for (before, after) in original.bookmarks.iter().zip(&draft.bookmarks) {
            assert_eq!(after - before, 250);
        }
        for (before, after) in original
            .timing
            .timing_points
            .iter()
            .zip(&draft.timing.timing_points)
        {
            assert_eq!(after.time_ms - before.time_ms, 250);
        }
    }

    #[test]
    fn test_negative_shift_rejected_atomically() {
        let mut original = draft_with(&[30, 500], &[800]);
        original.timing.offset_ms = 100;
        original.timing.timing_points[0].time_ms = 100;
        let hints = TimebaseHints {
            forced_offset_seconds: Some(0.0),
            ..Default::default()
        };
        let (draft, outcome) = TimebaseSynchroniser::new().synchronise(original.clone(), &hints);

        assert_eq!(
            outcome.offset,
            OffsetChange::Rejected {
                delta_ms: -100,
                earliest_ms: 30
            }
        );
        assert_eq!(draft, original);
    }

    #[test]
    fn test_bpm_change_leaves_hit_times_alone() {
        let hints = TimebaseHints {
            forced_bpm: Some(100.0),
            ..Default::default()
        };
        let (draft, outcome) = TimebaseSynchroniser::new().synchronise(draft_with(&[1000], &[]), &hints);

        assert!(outcome.bpm_updated);
        assert_eq!(draft.timing.bpm, 100.0);
        assert_eq!(draft.timing.timing_points[0].beat_length_ms, 600.0);
        assert_eq!(draft.hit_objects[0].time_ms, 1000);
    }

    #[test]
    fn test_bpm_within_tolerance_is_ignored() {
        let hints = TimebaseHints {
            forced_bpm: Some(120.0005),
            ..Default::default()
        };
        let (draft, outcome) = TimebaseSynchroniser::new().synchronise(draft_with(&[], &[]), &hints);
        assert!(!outcome.bpm_updated);
        assert_eq!(draft.timing.bpm, 120.0);
    }

    #[test]
    fn test_forced_step_sets_snap_divisor() {
        // 120 BPM beat = 500 ms, step 125 ms -> 4
        let hints = TimebaseHints {
            forced_bpm: Some(120.0),
            forced_step_seconds: Some(0.125),
            ..Default::default()
        };
        let (draft, outcome) = TimebaseSynchroniser::new().synchronise(draft_with(&[], &[]), &hints);
        assert_eq!(outcome.snap_divisor, Some(4));
        assert_eq!(draft.editor.snap_divisor, 4);
    }

    #[test]
    fn test_step_without_bpm_is_ignored() {
        let hints = TimebaseHints {
            forced_step_seconds: Some(0.125),
            ..Default::default()
        };
        let (draft, outcome) = TimebaseSynchroniser::new().synchronise(draft_with(&[], &[]), &hints);
        assert_eq!(outcome.snap_divisor, None);
        assert_eq!(draft.editor.snap_divisor, 4);
    }

    #[test]
    fn test_snap_divisor_clamped() {
        assert_eq!(snap_divisor_for(500.0, 1.0), MAX_SNAP_DIVISOR);
        assert_eq!(snap_divisor_for(500.0, 2000.0), MIN_SNAP_DIVISOR);
        assert_eq!(snap_divisor_for(500.0, 166.7), 3);
        assert_eq!(snap_divisor_for(500.0, 0.0), MIN_SNAP_DIVISOR);
    }

    #[test]
    fn test_first_timing_point_anchored_to_offset() {
        let mut draft = draft_with(&[], &[]);
        draft.timing.offset_ms = 40;
        draft.timing.timing_points.clear();
        let (draft, _) = TimebaseSynchroniser::new().synchronise(draft, &TimebaseHints::default());
        assert_eq!(draft.timing.timing_points[0].time_ms, 40);
        assert!(draft.validate().is_ok());
    }
}

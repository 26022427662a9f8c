// OnsetDetector - spectral flux-based onset detection over a complete buffer
//
// Algorithm:
// 1. Hann-windowed FFT per hop (1024-sample window, 256-sample hop by default)
// 2. Spectral flux: flux_t = Σ max(0, |X_t[k]| - |X_(t-1)[k]|)
// 3. Adaptive threshold: trailing mean of flux × sensitivity multiplier,
//    bounded below by a fraction of the loudest flux frame and an absolute floor
// 4. Peak pick: flux_t above threshold and strictly above both neighbours
// 5. Attack location: first sample after the frame start whose amplitude
//    crosses half the local maximum (sample-accurate onset time)
// 6. Refractory suppression: weaker candidates within the refractory window
//    of a stronger one are dropped
// 7. Spectral-shape features measured at every surviving peak

use serde::{Deserialize, Serialize};

use crate::analysis::features::fft::FftProcessor;
use crate::analysis::features::{FeatureExtractor, PeakFeatures};
use crate::config::OnsetDetectionConfig;
use crate::generation::cancel::{Cancelled, CancellationToken};
use crate::generation::progress::StageProgress;

/// Absolute threshold floor so silent buffers never produce peaks
const ABSOLUTE_THRESHOLD_FLOOR: f32 = 1e-6;

/// Fraction of the local maximum amplitude that marks the attack
const ATTACK_LEVEL_RATIO: f32 = 0.5;

/// Share of the reported progress spent in the flux frame loop
const FLUX_PROGRESS_SHARE: f32 = 0.9;

/// A detected onset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Onset time in seconds from the start of the buffer
    pub time_seconds: f64,
    /// Normalised energy-over-threshold ratio in [0, 1]
    pub confidence: f32,
    /// Spectral flux at the peak frame
    pub energy: f32,
    /// Adaptive threshold at the peak frame
    pub threshold: f32,
    /// Spectral shape measured at the onset
    pub features: PeakFeatures,
}

impl Peak {
    pub fn time_ms(&self) -> f64 {
        self.time_seconds * 1000.0
    }
}

/// Spectral-flux envelope and its adaptive threshold, one value per hop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Time of frame 0 (centre of the first window) in seconds
    pub first_frame_seconds: f64,
    /// Seconds between consecutive frames
    pub hop_seconds: f64,
    pub energy: Vec<f32>,
    pub threshold: Vec<f32>,
}

impl Envelope {
    pub fn len(&self) -> usize {
        self.energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }

    /// Centre time of `frame` in seconds
    pub fn time_at(&self, frame: usize) -> f64 {
        self.first_frame_seconds + frame as f64 * self.hop_seconds
    }

    /// (time, energy) pairs in frame order
    pub fn points(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.energy
            .iter()
            .enumerate()
            .map(|(frame, &energy)| (self.time_at(frame), energy))
    }
}

/// Envelope plus the peaks picked from it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnsetAnalysis {
    pub envelope: Envelope,
    pub peaks: Vec<Peak>,
}

/// Threshold multiplier for a sensitivity in [0, 100]
///
/// Sensitivity 0 maps to `max_multiplier`, 100 to `min_multiplier`; values
/// above 100 are treated as 100.
pub fn sensitivity_multiplier(config: &OnsetDetectionConfig, sensitivity: u8) -> f32 {
    let t = f32::from(sensitivity.min(100)) / 100.0;
    config.max_multiplier + (config.min_multiplier - config.max_multiplier) * t
}

struct Candidate {
    frame: usize,
    sample: usize,
    energy: f32,
    threshold: f32,
}

/// OnsetDetector uses the spectral flux algorithm to detect drum onsets
pub struct OnsetDetector {
    config: OnsetDetectionConfig,
    fft: FftProcessor,
    features: FeatureExtractor,
    sample_rate: u32,
    window_size: usize,
    hop_size: usize,
}

impl OnsetDetector {
    /// Create a detector for buffers at `sample_rate`
    pub fn new(sample_rate: u32, config: OnsetDetectionConfig) -> Self {
        let window_size = config.window_size.max(2);
        let hop_size = config.hop_size.max(1);
        let features = FeatureExtractor::new(sample_rate, config.feature_window_size.max(2));

        Self {
            fft: FftProcessor::new(window_size),
            features,
            sample_rate,
            window_size,
            hop_size,
            config,
        }
    }

    /// Detect onsets over the whole buffer
    pub fn detect(&self, samples: &[f32], sensitivity: u8) -> OnsetAnalysis {
        // A token that is never cancelled cannot produce Err
        self.detect_cancellable(samples, sensitivity, &CancellationToken::new())
            .unwrap_or_default()
    }

    /// Detect onsets, checking `token` every `cancel_check_frames` frames
    pub fn detect_cancellable(
        &self,
        samples: &[f32],
        sensitivity: u8,
        token: &CancellationToken,
    ) -> Result<OnsetAnalysis, Cancelled> {
        self.detect_with_progress(samples, sensitivity, token, &StageProgress::new())
    }

    /// Like [`detect_cancellable`](Self::detect_cancellable), also writing the
    /// fraction of work done to `progress` at every cancellation check
    pub fn detect_with_progress(
        &self,
        samples: &[f32],
        sensitivity: u8,
        token: &CancellationToken,
        progress: &StageProgress,
    ) -> Result<OnsetAnalysis, Cancelled> {
        let hop_seconds = self.hop_size as f64 / self.sample_rate.max(1) as f64;
        let mut envelope = Envelope {
            first_frame_seconds: (self.window_size / 2) as f64 / self.sample_rate.max(1) as f64,
            hop_seconds,
            energy: Vec::new(),
            threshold: Vec::new(),
        };

        if samples.len() < self.window_size || self.sample_rate == 0 {
            log::debug!(
                "[OnsetDetector] Buffer of {} samples shorter than one window, no onsets",
                samples.len()
            );
            progress.set(1.0);
            return Ok(OnsetAnalysis {
                envelope,
                peaks: Vec::new(),
            });
        }

        envelope.energy = self.compute_flux(samples, token, progress)?;
        envelope.threshold = self.compute_threshold(&envelope.energy, sensitivity);
        token.check()?;

        let candidates = self.pick_candidates(samples, &envelope.energy, &envelope.threshold);
        let kept = self.apply_refractory(candidates);
        token.check()?;

        let peaks = self.build_peaks(samples, kept);
        progress.set(1.0);

        log::debug!(
            "[OnsetDetector] {} frames, {} peaks at sensitivity {}",
            envelope.len(),
            peaks.len(),
            sensitivity
        );

        Ok(OnsetAnalysis { envelope, peaks })
    }

    fn frame_count(&self, len: usize) -> usize {
        if len < self.window_size {
            0
        } else {
            (len - self.window_size) / self.hop_size + 1
        }
    }

    /// Compute spectral flux as sum of positive magnitude differences per frame
    fn compute_flux(
        &self,
        samples: &[f32],
        token: &CancellationToken,
        progress: &StageProgress,
    ) -> Result<Vec<f32>, Cancelled> {
        let frames = self.frame_count(samples.len());
        let check_every = self.config.cancel_check_frames.max(1);
        let mut flux = Vec::with_capacity(frames);
        let mut prev_spectrum = vec![0.0_f32; self.fft.bin_count()];

        for frame in 0..frames {
            if frame % check_every == 0 {
                token.check()?;
                progress.set(FLUX_PROGRESS_SHARE * frame as f32 / frames as f32);
            }
            let start = frame * self.hop_size;
            let spectrum = self
                .fft
                .compute_magnitude_spectrum(&samples[start..start + self.window_size]);
            flux.push(spectral_flux(&spectrum, &prev_spectrum));
            prev_spectrum = spectrum;
        }
        progress.set(FLUX_PROGRESS_SHARE);

        Ok(flux)
    }

    /// Trailing moving mean × multiplier, bounded below by the global floor
    fn compute_threshold(&self, flux: &[f32], sensitivity: u8) -> Vec<f32> {
        let multiplier = sensitivity_multiplier(&self.config, sensitivity);
        let window_frames = ((self.config.threshold_window_ms / 1000.0 * self.sample_rate as f32)
            / self.hop_size as f32)
            .round()
            .max(1.0) as usize;

        let global_max = flux.iter().copied().fold(0.0_f32, f32::max);
        let floor = (global_max * self.config.global_floor_ratio).max(ABSOLUTE_THRESHOLD_FLOOR);

        // Running sum over flux[i - window_frames .. i]
        let mut running = 0.0_f64;
        let mut thresholds = Vec::with_capacity(flux.len());
        for i in 0..flux.len() {
            let count = i.min(window_frames);
            let mean = if count == 0 {
                0.0
            } else {
                (running / count as f64) as f32
            };
            thresholds.push((mean * multiplier).max(floor));

            running += f64::from(flux[i]);
            if i >= window_frames {
                running -= f64::from(flux[i - window_frames]);
            }
        }

        thresholds
    }

    fn pick_candidates(&self, samples: &[f32], flux: &[f32], threshold: &[f32]) -> Vec<Candidate> {
        if flux.len() < 3 {
            return Vec::new();
        }

        (1..flux.len() - 1)
            .filter(|&i| flux[i] > threshold[i] && flux[i] > flux[i - 1] && flux[i] > flux[i + 1])
            .map(|frame| Candidate {
                frame,
                sample: self.locate_attack(samples, frame),
                energy: flux[frame],
                threshold: threshold[frame],
            })
            .collect()
    }

    /// Sample where the amplitude first crosses half of the local maximum
    ///
    /// The peak frame's window holds the attack somewhere past its first
    /// quarter; the search extends one hop beyond the window.
    fn locate_attack(&self, samples: &[f32], frame: usize) -> usize {
        let frame_start = frame * self.hop_size;
        let start = (frame_start + self.window_size / 4).min(samples.len());
        let end = (frame_start + self.window_size + self.hop_size).min(samples.len());
        let centre = frame_start + self.window_size / 2;

        let region = &samples[start..end];
        let local_max = region.iter().fold(0.0_f32, |acc, x| acc.max(x.abs()));
        if local_max <= 0.0 {
            return centre;
        }

        let level = local_max * ATTACK_LEVEL_RATIO;
        region
            .iter()
            .position(|x| x.abs() >= level)
            .map(|offset| start + offset)
            .unwrap_or(centre)
    }

    /// Keep the strongest candidates, dropping any within the refractory
    /// window of an already kept one. Output is time-ordered.
    fn apply_refractory(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let refractory_samples =
            (self.config.refractory_ms.max(0.0) / 1000.0 * self.sample_rate as f32).ceil() as usize;

        // Strongest first; ties resolved by earlier frame for determinism
        candidates.sort_by(|a, b| b.energy.total_cmp(&a.energy).then(a.frame.cmp(&b.frame)));

        let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let clashes = kept
                .iter()
                .any(|k| k.sample.abs_diff(candidate.sample) < refractory_samples);
            if !clashes {
                kept.push(candidate);
            }
        }

        kept.sort_by_key(|c| c.sample);
        kept
    }

    fn build_peaks(&self, samples: &[f32], kept: Vec<Candidate>) -> Vec<Peak> {
        let ceiling = self.config.confidence_ratio_ceiling.max(1.0 + f32::EPSILON);

        kept.iter()
            .enumerate()
            .map(|(i, candidate)| {
                let next_onset = kept.get(i + 1).map_or(samples.len(), |next| next.sample);
                let ratio = candidate.energy / candidate.threshold;
                Peak {
                    time_seconds: candidate.sample as f64 / self.sample_rate as f64,
                    confidence: ((ratio - 1.0) / (ceiling - 1.0)).clamp(0.0, 1.0),
                    energy: candidate.energy,
                    threshold: candidate.threshold,
                    features: self.features.extract_at(samples, candidate.sample, next_onset),
                }
            })
            .collect()
    }
}

/// SF(t) = Σ max(0, |X_t[k]| - |X_(t-1)[k]|)
fn spectral_flux(spectrum: &[f32], prev_spectrum: &[f32]) -> f32 {
    spectrum
        .iter()
        .zip(prev_spectrum.iter())
        .map(|(curr, prev)| (curr - prev).max(0.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44_100;

    /// Decaying noise-free clicks at the given times
    fn click_signal(duration_ms: u32, click_times_ms: &[u32]) -> Vec<f32> {
        let total = (SAMPLE_RATE as u64 * duration_ms as u64 / 1000) as usize;
        let mut signal = vec![0.0; total];
        for &time_ms in click_times_ms {
            let start = (SAMPLE_RATE as u64 * time_ms as u64 / 1000) as usize;
            for i in 0..2_000 {
                if start + i >= total {
                    break;
                }
                let t = i as f32 / SAMPLE_RATE as f32;
                signal[start + i] +=
                    (-t / 0.01).exp() * (2.0 * std::f32::consts::PI * 1_000.0 * t).cos();
            }
        }
        signal
    }

    fn detector() -> OnsetDetector {
        OnsetDetector::new(SAMPLE_RATE, OnsetDetectionConfig::default())
    }

    #[test]
    fn test_detects_clicks_at_sample_accurate_times() {
        let signal = click_signal(2_000, &[250, 750, 1_250, 1_750]);
        let analysis = detector().detect(&signal, 50);

        let times: Vec<f64> = analysis.peaks.iter().map(|p| p.time_ms()).collect();
        assert_eq!(times.len(), 4, "peaks at {times:?}");
        for (found, expected) in times.iter().zip([250.0, 750.0, 1_250.0, 1_750.0]) {
            assert!((found - expected).abs() < 2.0, "{found} vs {expected}");
        }
        assert!(analysis.peaks.iter().all(|p| p.confidence > 0.9));
    }

    #[test]
    fn test_envelope_and_threshold_have_equal_length() {
        let signal = click_signal(1_000, &[500]);
        let analysis = detector().detect(&signal, 50);
        assert!(!analysis.envelope.is_empty());
        assert_eq!(analysis.envelope.energy.len(), analysis.envelope.threshold.len());

        let (t0, _) = analysis.envelope.points().next().unwrap();
        assert!((t0 - 512.0 / SAMPLE_RATE as f64).abs() < 1e-9);
    }

    #[test]
    fn test_no_false_positives_on_silence() {
        let signal = vec![0.0; SAMPLE_RATE as usize * 2];
        let analysis = detector().detect(&signal, 100);
        assert!(analysis.peaks.is_empty());
        assert!(analysis.envelope.energy.iter().all(|e| *e == 0.0));
    }

    #[test]
    fn test_buffer_shorter_than_window() {
        let analysis = detector().detect(&[0.5; 100], 50);
        assert!(analysis.peaks.is_empty());
        assert!(analysis.envelope.is_empty());
    }

    #[test]
    fn test_refractory_keeps_peaks_apart() {
        // Pairs 10 ms apart collapse to single peaks
        let signal = click_signal(2_000, &[300, 310, 900, 910, 1_500]);
        let config = OnsetDetectionConfig::default();
        let analysis = detector().detect(&signal, 100);

        for pair in analysis.peaks.windows(2) {
            let gap_ms = (pair[1].time_seconds - pair[0].time_seconds) * 1000.0;
            assert!(gap_ms >= f64::from(config.refractory_ms) - 0.05, "gap {gap_ms}");
        }
        assert_eq!(analysis.peaks.len(), 3);
    }

    #[test]
    fn test_sensitivity_lowers_multiplier() {
        let config = OnsetDetectionConfig::default();
        assert_eq!(sensitivity_multiplier(&config, 0), config.max_multiplier);
        assert_eq!(sensitivity_multiplier(&config, 100), config.min_multiplier);
        assert!(sensitivity_multiplier(&config, 80) < sensitivity_multiplier(&config, 20));
        assert_eq!(
            sensitivity_multiplier(&config, 200),
            sensitivity_multiplier(&config, 100)
        );
    }

    #[test]
    fn test_higher_sensitivity_admits_weaker_peaks() {
        let mut signal = click_signal(3_000, &[500, 1_500, 2_500]);
        let quiet = click_signal(3_000, &[1_000, 2_000]);
        for (s, q) in signal.iter_mut().zip(quiet) {
            *s += q * 0.12;
        }

        let strict = detector().detect(&signal, 0);
        let loose = detector().detect(&signal, 100);
        assert!(loose.peaks.len() >= strict.peaks.len());
        assert_eq!(loose.peaks.len(), 5);
    }

    #[test]
    fn test_spectral_flux_positive_difference() {
        assert_eq!(spectral_flux(&[1.0; 129], &[1.0; 129]), 0.0);
        assert_eq!(spectral_flux(&[2.0; 129], &[1.0; 129]), 129.0);
        assert_eq!(spectral_flux(&[0.0; 129], &[1.0; 129]), 0.0);
    }

    #[test]
    fn test_cancelled_token_stops_detection() {
        let signal = click_signal(2_000, &[500, 1_000]);
        let token = CancellationToken::new();
        token.cancel();
        let result = detector().detect_cancellable(&signal, 50, &token);
        assert_eq!(result, Err(Cancelled));
    }

    #[test]
    fn test_progress_reaches_one_after_detection() {
        let signal = click_signal(2_000, &[500, 1_000]);
        let progress = StageProgress::new();
        let result =
            detector().detect_with_progress(&signal, 50, &CancellationToken::new(), &progress);
        assert!(result.is_ok());
        assert_eq!(progress.get(), 1.0);
    }

    #[test]
    fn test_cancelled_detection_reports_partial_progress() {
        let signal = click_signal(2_000, &[500, 1_000]);
        let token = CancellationToken::new();
        token.cancel();
        let progress = StageProgress::new();
        let result = detector().detect_with_progress(&signal, 50, &token, &progress);
        assert_eq!(result, Err(Cancelled));
        assert!(progress.get() < 1.0);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let signal = click_signal(2_000, &[200, 700, 1_100, 1_650]);
        let first = detector().detect(&signal, 60);
        let second = detector().detect(&signal, 60);
        assert_eq!(first, second);
    }
}

// FeatureExtractor - spectral-shape features for drum peak classification
//
// Module organization:
// - types: PeakFeatures struct
// - fft: windowed FFT shared with the onset detector
// - spectral: frequency-domain features (centroid, flatness, rolloff, band ratios)
// - temporal: time-domain features (ZCR, decay time)
// - mod.rs: coordinator (FeatureExtractor)
//
// Features are measured on the samples that start just before a detected
// onset. Spectral features use one FFT window; decay time looks further ahead
// (bounded by the next onset) so open hi-hats and cymbals can ring out.
//
// References:
// - Peeters, G. (2004). A large set of audio features for sound description
// - Lerch, A. (2012). An Introduction to Audio Content Analysis

pub(crate) mod fft;
mod spectral;
mod temporal;
mod types;

pub use types::PeakFeatures;

use fft::FftProcessor;
use spectral::SpectralFeatures;
use temporal::TemporalFeatures;

/// Upper edge of the low band (kick and floor tom fundamentals)
pub const LOW_BAND_HZ: f32 = 250.0;

/// Lower edge of the high band (hi-hat and cymbal energy)
pub const HIGH_BAND_HZ: f32 = 4000.0;

/// Longest stretch after an onset used to measure decay
pub const DECAY_WINDOW_MS: f32 = 400.0;

/// FeatureExtractor coordinates FFT, spectral and temporal extraction
pub struct FeatureExtractor {
    fft_processor: FftProcessor,
    spectral_features: SpectralFeatures,
    temporal_features: TemporalFeatures,
    sample_rate: u32,
    fft_size: usize,
}

impl FeatureExtractor {
    /// Create a new FeatureExtractor
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `fft_size` - Spectral analysis window in samples
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        let fft_processor = FftProcessor::new(fft_size);
        let fft_size = fft_processor.fft_size();

        Self {
            fft_processor,
            spectral_features: SpectralFeatures::new(sample_rate, fft_size),
            temporal_features: TemporalFeatures::new(sample_rate),
            sample_rate,
            fft_size,
        }
    }

    /// Extract all features from an audio window
    ///
    /// Spectral features use the first `fft_size` samples (zero-padded when
    /// shorter); temporal features use the whole slice.
    pub fn extract(&self, audio: &[f32]) -> PeakFeatures {
        let spectral_window = &audio[..audio.len().min(self.fft_size)];
        let spectrum = self
            .fft_processor
            .compute_magnitude_spectrum(spectral_window);

        let bands = self
            .spectral_features
            .compute_band_ratios(&spectrum, LOW_BAND_HZ, HIGH_BAND_HZ);

        PeakFeatures {
            centroid: self.spectral_features.compute_centroid(&spectrum),
            rolloff: self.spectral_features.compute_rolloff(&spectrum),
            flatness: self.spectral_features.compute_flatness(&spectrum),
            zcr: self.temporal_features.compute_zcr(spectral_window),
            decay_time_ms: self.temporal_features.compute_decay_time(audio),
            low_band_ratio: bands.low,
            mid_band_ratio: bands.mid,
            high_band_ratio: bands.high,
        }
    }

    /// Extract features for an onset at `onset_sample`
    ///
    /// The window starts a quarter FFT before the onset and ends at
    /// `limit_sample` (typically the next onset) or after
    /// [`DECAY_WINDOW_MS`], whichever comes first.
    pub fn extract_at(&self, samples: &[f32], onset_sample: usize, limit_sample: usize) -> PeakFeatures {
        let start = onset_sample
            .saturating_sub(self.fft_size / 4)
            .min(samples.len());
        let decay_len = (DECAY_WINDOW_MS / 1000.0 * self.sample_rate as f32) as usize;
        let end = (onset_sample + decay_len)
            .min(limit_sample.max(start + self.fft_size))
            .min(samples.len());

        if start >= end {
            return PeakFeatures::default();
        }
        self.extract(&samples[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FFT_SIZE: usize = 1024;

    fn generate_sine_wave(sample_rate: u32, frequency: f32, duration_samples: usize) -> Vec<f32> {
        (0..duration_samples)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin()
            })
            .collect()
    }

    fn generate_white_noise(duration_samples: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(0x5A5A_FFF0);
        (0..duration_samples)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect()
    }

    #[test]
    fn test_centroid_tracks_frequency() {
        let extractor = FeatureExtractor::new(48_000, FFT_SIZE);

        let low = extractor.extract(&generate_sine_wave(48_000, 100.0, FFT_SIZE));
        let high = extractor.extract(&generate_sine_wave(48_000, 5000.0, FFT_SIZE));

        assert!(low.centroid < 500.0, "low centroid {}", low.centroid);
        assert!(high.centroid > 3000.0, "high centroid {}", high.centroid);
        assert!(high.rolloff > low.rolloff);
    }

    #[test]
    fn test_band_ratios_follow_content() {
        let extractor = FeatureExtractor::new(48_000, FFT_SIZE);

        let kick_like = extractor.extract(&generate_sine_wave(48_000, 80.0, FFT_SIZE));
        let cymbal_like = extractor.extract(&generate_sine_wave(48_000, 9000.0, FFT_SIZE));

        assert!(kick_like.low_band_ratio > 0.8);
        assert!(cymbal_like.high_band_ratio > 0.8);
    }

    #[test]
    fn test_flatness_sine_vs_noise() {
        let extractor = FeatureExtractor::new(48_000, FFT_SIZE);

        let sine = extractor.extract(&generate_sine_wave(48_000, 1000.0, FFT_SIZE));
        let noise = extractor.extract(&generate_white_noise(FFT_SIZE));

        assert!(sine.flatness < 0.2, "sine flatness {}", sine.flatness);
        assert!(noise.flatness > 0.5, "noise flatness {}", noise.flatness);
        assert!(noise.zcr > 0.3 && sine.zcr < 0.1);
    }

    #[test]
    fn test_extract_with_silence() {
        let extractor = FeatureExtractor::new(48_000, FFT_SIZE);
        let features = extractor.extract(&vec![0.0; FFT_SIZE]);
        assert!(features.is_silent());
    }

    #[test]
    fn test_extract_at_respects_buffer_end() {
        let extractor = FeatureExtractor::new(48_000, FFT_SIZE);
        let signal = generate_sine_wave(48_000, 1000.0, 2000);

        let near_end = extractor.extract_at(&signal, 1900, usize::MAX);
        assert!(near_end.centroid > 0.0);

        let past_end = extractor.extract_at(&signal, 5000, usize::MAX);
        assert!(past_end.is_silent());
    }
}

// Temporal module - Time-domain feature extraction
//
// Zero-crossing rate and amplitude envelope decay, measured on the samples
// that follow a detected onset.

/// Temporal feature computation functions
pub struct TemporalFeatures {
    sample_rate: u32,
}

impl TemporalFeatures {
    /// Create a new temporal features processor
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Compute zero-crossing rate (ZCR)
    ///
    /// Fraction of adjacent sample pairs whose sign differs. High ZCR
    /// indicates high-frequency or noise-like content.
    ///
    /// # Returns
    /// Zero-crossing rate (0.0 to 1.0)
    pub fn compute_zcr(&self, audio: &[f32]) -> f32 {
        if audio.len() < 2 {
            return 0.0;
        }
        if audio.iter().all(|sample| *sample == 0.0) {
            return 0.0;
        }

        let crossings = audio
            .windows(2)
            .filter(|pair| (pair[0] < 0.0) != (pair[1] < 0.0))
            .count();

        crossings as f32 / (audio.len() - 1) as f32
    }

    /// Compute temporal envelope decay time
    ///
    /// The envelope is the per-millisecond peak of |x|, which keeps a decaying
    /// tone from registering as decayed at its first zero crossing. Decay time
    /// is measured from the loudest block to the first block below -20 dB
    /// (10% of peak amplitude).
    ///
    /// # Returns
    /// Decay time in milliseconds (time to the end of the window when the
    /// signal never decays that far)
    pub fn compute_decay_time(&self, audio: &[f32]) -> f32 {
        if audio.is_empty() || self.sample_rate == 0 {
            return 0.0;
        }

        let block = (self.sample_rate as usize / 1000).max(1);
        let envelope: Vec<f32> = audio
            .chunks(block)
            .map(|chunk| chunk.iter().fold(0.0_f32, |acc, x| acc.max(x.abs())))
            .collect();

        let (peak_idx, peak_amp) = envelope
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0.0_f32), |best, (i, amp)| {
                if amp > best.1 {
                    (i, amp)
                } else {
                    best
                }
            });

        if peak_amp < 1e-6 {
            return 0.0;
        }

        let decay_threshold = peak_amp * 0.1;
        let decay_blocks = envelope[peak_idx..]
            .iter()
            .position(|&amp| amp < decay_threshold)
            .unwrap_or(envelope.len() - peak_idx);

        (decay_blocks * block) as f32 / self.sample_rate as f32 * 1000.0
    }
}

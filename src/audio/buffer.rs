//! Immutable, cheaply clonable mono sample buffer.

use std::sync::Arc;

use crate::error::AudioError;

/// Mono PCM buffer shared read-only between the caller and a generation run.
///
/// Samples live behind an `Arc<[f32]>`, so handing a buffer to a stage worker
/// is a reference-count bump and nothing downstream can mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap mono samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Downmix interleaved multi-channel samples by averaging each frame.
    pub fn from_interleaved(
        interleaved: &[f32],
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, AudioError> {
        if channels == 0 {
            return Err(AudioError::DecodeFailed {
                reason: "zero channels".to_string(),
            });
        }
        if channels == 1 {
            return Ok(Self::new(interleaved.to_vec(), sample_rate));
        }

        let mono = interleaved
            .chunks(channels as usize)
            .map(|frame| frame.iter().copied().sum::<f32>() / channels as f32)
            .collect();
        Ok(Self::new(mono, sample_rate))
    }

    /// Zero-amplitude buffer of the given length.
    pub fn silence(duration_seconds: f64, sample_rate: u32) -> Self {
        let len = (duration_seconds.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds (0 when the sample rate is invalid)
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Largest absolute sample value
    pub fn peak_amplitude(&self) -> f32 {
        self.samples
            .iter()
            .fold(0.0_f32, |acc, sample| acc.max(sample.abs()))
    }

    /// Check the buffer can enter the pipeline.
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate {
                sample_rate: self.sample_rate,
            });
        }
        if self.samples.is_empty() {
            return Err(AudioError::EmptyBuffer);
        }
        if self.samples.iter().any(|sample| !sample.is_finite()) {
            return Err(AudioError::DecodeFailed {
                reason: "buffer contains non-finite samples".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_and_len() {
        let buffer = AudioBuffer::new(vec![0.0; 44_100], 44_100);
        assert_eq!(buffer.len(), 44_100);
        assert!((buffer.duration_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_downmix_averages_frames() {
        let interleaved = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let buffer = AudioBuffer::from_interleaved(&interleaved, 2, 8_000).unwrap();
        assert_eq!(buffer.samples(), &[0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_clone_shares_samples() {
        let buffer = AudioBuffer::new(vec![0.25; 16], 8_000);
        let clone = buffer.clone();
        assert!(std::ptr::eq(buffer.samples(), clone.samples()));
    }

    #[test]
    fn test_validate_rejects_empty_and_zero_rate() {
        assert_eq!(
            AudioBuffer::new(Vec::new(), 44_100).validate(),
            Err(AudioError::EmptyBuffer)
        );
        assert_eq!(
            AudioBuffer::new(vec![0.0; 4], 0).validate(),
            Err(AudioError::InvalidSampleRate { sample_rate: 0 })
        );
        assert!(AudioBuffer::new(vec![f32::NAN; 4], 44_100)
            .validate()
            .is_err());
    }

    #[test]
    fn test_silence_is_valid() {
        let buffer = AudioBuffer::silence(10.0, 22_050);
        assert_eq!(buffer.len(), 220_500);
        assert_eq!(buffer.peak_amplitude(), 0.0);
        assert!(buffer.validate().is_ok());
    }
}

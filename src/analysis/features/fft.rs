// FFT module - windowed magnitude spectra
//
// Shared by the onset detector (one spectrum per hop) and the feature
// extractor (one spectrum per peak). The plan is built once per processor.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// FFT processor that computes magnitude spectra from audio windows
pub struct FftProcessor {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    /// Hann window for FFT (pre-computed)
    window: Vec<f32>,
}

impl FftProcessor {
    /// Create a new FFT processor
    ///
    /// # Arguments
    /// * `fft_size` - FFT window size (at least 2)
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Self {
            fft,
            fft_size,
            window: hann_window(fft_size),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins returned by [`compute_magnitude_spectrum`](Self::compute_magnitude_spectrum)
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Compute magnitude spectrum using FFT
    ///
    /// Applies Hann windowing, zero-pads short input, and returns magnitudes
    /// for positive frequencies only.
    ///
    /// # Arguments
    /// * `audio` - Audio window (samples past `fft_size` are ignored)
    ///
    /// # Returns
    /// Magnitude spectrum (size = fft_size / 2 + 1)
    pub fn compute_magnitude_spectrum(&self, audio: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = audio
            .iter()
            .zip(self.window.iter())
            .map(|(sample, window_val)| Complex::new(sample * window_val, 0.0))
            .collect();
        buffer.resize(self.fft_size, Complex::new(0.0, 0.0));

        self.fft.process(&mut buffer);

        buffer[..self.bin_count()].iter().map(|c| c.norm()).collect()
    }
}

/// Symmetric Hann window of the given length
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - ((2.0 * std::f32::consts::PI * i as f32) / (size as f32 - 1.0)).cos())
        })
        .collect()
}

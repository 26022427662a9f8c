// Spectral shape of a single drum hit
//
// Every measure works on one magnitude spectrum (|X[k]| per FFT bin) taken
// just after the onset. Kicks sit low with a steep rolloff, cymbals spread
// wide and flat, snares fall in between.

/// Spectral rolloff threshold (85% of spectral energy)
const ROLLOFF_THRESHOLD: f32 = 0.85;

/// Energy split into low/mid/high bands, each as a fraction of the total
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandRatios {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

/// Spectral feature computation functions
pub struct SpectralFeatures {
    sample_rate: u32,
    fft_size: usize,
}

impl SpectralFeatures {
    /// Create a new spectral features processor
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `fft_size` - FFT window size
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        Self {
            sample_rate,
            fft_size,
        }
    }

    fn bin_width(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Compute spectral centroid (weighted mean frequency)
    ///
    /// Formula: centroid = Σ(f_i × |X[i]|) / Σ|X[i]|
    ///
    /// # Returns
    /// Spectral centroid in Hz (0 for an empty or silent spectrum)
    pub fn compute_centroid(&self, spectrum: &[f32]) -> f32 {
        let freq_bin_width = self.bin_width();

        let weighted_sum: f32 = spectrum
            .iter()
            .enumerate()
            .map(|(i, &mag)| i as f32 * freq_bin_width * mag)
            .sum();

        let magnitude_sum: f32 = spectrum.iter().sum();

        if magnitude_sum > 1e-10 {
            weighted_sum / magnitude_sum
        } else {
            0.0
        }
    }

    /// Compute spectral flatness (tonality measure)
    ///
    /// Formula: flatness = geometric_mean(|X[i]|) / arithmetic_mean(|X[i]|)
    ///
    /// Returns value between 0 (tonal, e.g., sine wave) and 1 (noise-like).
    pub fn compute_flatness(&self, spectrum: &[f32]) -> f32 {
        let non_zero: Vec<f32> = spectrum
            .iter()
            .filter(|&&mag| mag > 1e-10)
            .copied()
            .collect();

        if non_zero.is_empty() {
            return 0.0;
        }

        // Geometric mean: exp(mean(log(x)))
        let log_sum: f32 = non_zero.iter().map(|&mag| mag.ln()).sum();
        let geometric_mean = (log_sum / non_zero.len() as f32).exp();
        let arithmetic_mean: f32 = non_zero.iter().sum::<f32>() / non_zero.len() as f32;

        if arithmetic_mean > 1e-10 {
            (geometric_mean / arithmetic_mean).min(1.0)
        } else {
            0.0
        }
    }

    /// Compute spectral rolloff (85% energy threshold frequency)
    ///
    /// # Returns
    /// Rolloff frequency in Hz
    pub fn compute_rolloff(&self, spectrum: &[f32]) -> f32 {
        let total_energy: f32 = spectrum.iter().map(|&mag| mag * mag).sum();

        if total_energy < 1e-10 {
            return 0.0;
        }

        let threshold = ROLLOFF_THRESHOLD * total_energy;
        let freq_bin_width = self.bin_width();

        let mut cumulative_energy = 0.0;
        for (i, &mag) in spectrum.iter().enumerate() {
            cumulative_energy += mag * mag;
            if cumulative_energy >= threshold {
                return i as f32 * freq_bin_width;
            }
        }

        (spectrum.len() - 1) as f32 * freq_bin_width
    }

    /// Split spectral energy at `low_edge_hz` and `high_edge_hz`
    ///
    /// Ratios sum to 1 for any non-silent spectrum and are all zero otherwise.
    pub fn compute_band_ratios(
        &self,
        spectrum: &[f32],
        low_edge_hz: f32,
        high_edge_hz: f32,
    ) -> BandRatios {
        let freq_bin_width = self.bin_width();
        let mut bands = [0.0_f32; 3];

        for (i, &mag) in spectrum.iter().enumerate() {
            let freq = i as f32 * freq_bin_width;
            let slot = if freq < low_edge_hz {
                0
            } else if freq < high_edge_hz {
                1
            } else {
                2
            };
            bands[slot] += mag * mag;
        }

        let total: f32 = bands.iter().sum();
        if total < 1e-10 {
            return BandRatios::default();
        }

        BandRatios {
            low: bands[0] / total,
            mid: bands[1] / total,
            high: bands[2] / total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_ratios_sum_to_one() {
        let spectral = SpectralFeatures::new(48_000, 1024);
        let spectrum: Vec<f32> = (0..513).map(|i| 1.0 / (1.0 + i as f32)).collect();
        let ratios = spectral.compute_band_ratios(&spectrum, 250.0, 4000.0);
        assert!((ratios.low + ratios.mid + ratios.high - 1.0).abs() < 1e-5);
        assert!(ratios.low > ratios.high);
    }

    #[test]
    fn test_band_ratios_silent_spectrum() {
        let spectral = SpectralFeatures::new(48_000, 1024);
        let ratios = spectral.compute_band_ratios(&[0.0; 513], 250.0, 4000.0);
        assert_eq!(ratios, BandRatios::default());
    }

    #[test]
    fn test_rolloff_of_single_bin() {
        let spectral = SpectralFeatures::new(1024, 1024);
        let mut spectrum = vec![0.0; 513];
        spectrum[100] = 1.0;
        assert_eq!(spectral.compute_rolloff(&spectrum), 100.0);
        assert_eq!(spectral.compute_centroid(&spectrum), 100.0);
    }
}

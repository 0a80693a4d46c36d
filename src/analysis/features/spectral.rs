// Spectral module - Frequency-domain feature extraction
//
// All features work on the one-sided magnitude spectrum produced by
// `FftProcessor`, where bin k sits at k * sample_rate / fft_size Hz.

/// Cumulative magnitude fraction that defines the rolloff bin
pub const ROLLOFF_THRESHOLD: f32 = 0.85;

/// Band summed by the mel energy score, in Hz (inclusive)
pub const MEL_BAND_LOW_HZ: f32 = 125.0;
pub const MEL_BAND_HIGH_HZ: f32 = 7500.0;

/// Spectral feature computation for one window length
pub struct SpectralFeatures {
    sample_rate: u32,
    fft_size: usize,
}

impl SpectralFeatures {
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `fft_size` - Transform length (the window length)
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        Self {
            sample_rate,
            fft_size,
        }
    }

    fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Compute spectral centroid (weighted mean frequency)
    ///
    /// Formula: centroid = Σ(f_i × |X[i]|) / Σ|X[i]|
    ///
    /// # Returns
    /// Spectral centroid in Hz, or 0.0 when the spectrum carries no magnitude
    pub fn compute_centroid(&self, spectrum: &[f32]) -> f32 {
        let weighted_sum: f32 = spectrum
            .iter()
            .enumerate()
            .map(|(i, &mag)| self.bin_frequency(i) * mag)
            .sum();

        let magnitude_sum: f32 = spectrum.iter().sum();

        if magnitude_sum > 0.0 {
            weighted_sum / magnitude_sum
        } else {
            0.0
        }
    }

    /// Compute spectral rolloff
    ///
    /// Walks the bins accumulating magnitude and returns the frequency of the
    /// first bin where the running sum reaches 85% of the total. A spectrum
    /// with no magnitude at all yields the Nyquist frequency.
    pub fn compute_rolloff(&self, spectrum: &[f32]) -> f32 {
        let total: f32 = spectrum.iter().sum();
        if total <= 0.0 {
            return self.nyquist();
        }

        let threshold = ROLLOFF_THRESHOLD * total;
        let mut cumulative = 0.0;
        for (i, &mag) in spectrum.iter().enumerate() {
            cumulative += mag;
            if cumulative >= threshold {
                return self.bin_frequency(i);
            }
        }

        // Rounding can leave the running sum a hair below the threshold
        self.nyquist()
    }

    /// Natural log of the magnitude summed over the 125-7500 Hz band
    ///
    /// Returns 0.0 when nothing falls inside the band.
    pub fn compute_mel_energy(&self, spectrum: &[f32]) -> f32 {
        let band_sum: f32 = spectrum
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let freq = self.bin_frequency(*i);
                (MEL_BAND_LOW_HZ..=MEL_BAND_HIGH_HZ).contains(&freq)
            })
            .map(|(_, &mag)| mag)
            .sum();

        if band_sum > 0.0 {
            band_sum.ln()
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_of_single_bin() {
        let spectral = SpectralFeatures::new(16_000, 1_600);
        let mut spectrum = vec![0.0; 801];
        spectrum[150] = 4.0;
        assert!((spectral.compute_centroid(&spectrum) - 1_500.0).abs() < 1e-3);
    }

    #[test]
    fn test_centroid_of_empty_spectrum_is_zero() {
        let spectral = SpectralFeatures::new(16_000, 1_600);
        assert_eq!(spectral.compute_centroid(&[0.0; 801]), 0.0);
        assert_eq!(spectral.compute_centroid(&[]), 0.0);
    }

    #[test]
    fn test_rolloff_uses_cumulative_magnitude() {
        let spectral = SpectralFeatures::new(8_000, 8);
        // Bins at 0, 1000, 2000, 3000, 4000 Hz
        let spectrum = [0.0, 5.0, 3.0, 1.0, 1.0];
        // Total 10, threshold 8.5: 5 then 8 then 9 reaches it at bin 3
        assert!((spectral.compute_rolloff(&spectrum) - 3_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_rolloff_silent_spectrum_is_nyquist() {
        let spectral = SpectralFeatures::new(16_000, 1_600);
        assert_eq!(spectral.compute_rolloff(&[0.0; 801]), 8_000.0);
    }

    #[test]
    fn test_mel_energy_band_limits() {
        let spectral = SpectralFeatures::new(16_000, 1_600);
        let mut spectrum = vec![0.0; 801];
        // 100 Hz and 7600 Hz sit outside the band
        spectrum[10] = 50.0;
        spectrum[760] = 50.0;
        assert_eq!(spectral.compute_mel_energy(&spectrum), 0.0);

        // 125 Hz is not a bin centre at 10 Hz spacing, 130 Hz is inside
        spectrum[13] = std::f32::consts::E;
        assert!((spectral.compute_mel_energy(&spectrum) - 1.0).abs() < 1e-5);
    }
}

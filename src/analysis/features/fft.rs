// FFT module - magnitude spectrum of one analysis window
//
// The transform length always equals the window length, so bin k maps to
// k * sample_rate / N exactly. No taper is applied: the rule thresholds were
// tuned on the raw rectangular-window spectrum.

use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::{Arc, Mutex};

/// Computes one-sided magnitude spectra, caching FFT plans per length
#[derive(Clone)]
pub struct FftProcessor {
    fft_planner: Arc<Mutex<FftPlanner<f32>>>,
}

impl FftProcessor {
    pub fn new() -> Self {
        Self {
            fft_planner: Arc::new(Mutex::new(FftPlanner::new())),
        }
    }

    /// Magnitude spectrum for bins `0..=N/2`
    ///
    /// Returns an empty vector for an empty input.
    pub fn compute_magnitude_spectrum(&self, audio: &[f32]) -> Vec<f32> {
        let n = audio.len();
        if n == 0 {
            return Vec::new();
        }

        let mut buffer: Vec<Complex<f32>> =
            audio.iter().map(|&sample| Complex::new(sample, 0.0)).collect();

        let fft = {
            // The planner only caches plans, so a poisoned lock is still usable
            let mut planner = self
                .fft_planner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            planner.plan_fft_forward(n)
        };
        fft.process(&mut buffer);

        buffer[..n / 2 + 1].iter().map(|c| c.norm()).collect()
    }
}

impl Default for FftProcessor {
    fn default() -> Self {
        Self::new()
    }
}

// FeatureExtractor - per-window acoustic features for cough classification
//
// Module organization:
// - types: Data structures (FeatureVector)
// - fft: one-sided magnitude spectrum via rustfft
// - spectral: Frequency-domain features (centroid, rolloff, mel energy)
// - temporal: Time-domain features (amplitude, ZCR)
// - mod.rs: Coordinator (FeatureExtractor)
//
// The transform runs over the whole window (1600 samples at 16 kHz), so
// the bin spacing is always 10 Hz for 100 ms windows regardless of rate.

mod fft;
mod spectral;
mod temporal;
mod types;

pub use spectral::{MEL_BAND_HIGH_HZ, MEL_BAND_LOW_HZ, ROLLOFF_THRESHOLD};
pub use types::FeatureVector;

use fft::FftProcessor;
use spectral::SpectralFeatures;

/// FeatureExtractor coordinates the feature pipeline for one sample rate
///
/// Extraction is a pure function of the input samples. The extractor only
/// holds a cache of FFT plans, so clones share it.
#[derive(Clone)]
pub struct FeatureExtractor {
    sample_rate: u32,
    fft_processor: FftProcessor,
}

impl FeatureExtractor {
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz (e.g., 16000)
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fft_processor: FftProcessor::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Extract all features from an audio window
    ///
    /// An empty window yields `FeatureVector::default()` (all zeros).
    pub fn extract(&self, audio: &[f32]) -> FeatureVector {
        if audio.is_empty() {
            return FeatureVector::default();
        }

        let spectrum = self.fft_processor.compute_magnitude_spectrum(audio);
        let spectral = SpectralFeatures::new(self.sample_rate, audio.len());

        FeatureVector {
            amplitude: temporal::compute_amplitude(audio),
            zero_crossing_rate: temporal::compute_zcr(audio),
            spectral_centroid_hz: spectral.compute_centroid(&spectrum),
            spectral_rolloff_hz: spectral.compute_rolloff(&spectrum),
            mel_energy_score: spectral.compute_mel_energy(&spectrum),
        }
    }
}

// Types module - Data structures for audio features

use serde::{Deserialize, Serialize};

/// Features extracted from one 100 ms window
///
/// Computed fresh for every window and never mutated afterwards. Every
/// field is finite for finite input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    /// Mean absolute sample value
    pub amplitude: f32,

    /// Fraction of adjacent sample pairs whose sign differs (0.0 to 1.0)
    pub zero_crossing_rate: f32,

    /// Magnitude-weighted mean frequency in Hz
    pub spectral_centroid_hz: f32,

    /// Lowest frequency at which cumulative magnitude reaches 85% of the total
    pub spectral_rolloff_hz: f32,

    /// Natural log of summed magnitude over 125-7500 Hz
    ///
    /// A single-band approximation of mel energy, not a filterbank.
    pub mel_energy_score: f32,
}

impl FeatureVector {
    pub fn is_finite(&self) -> bool {
        self.amplitude.is_finite()
            && self.zero_crossing_rate.is_finite()
            && self.spectral_centroid_hz.is_finite()
            && self.spectral_rolloff_hz.is_finite()
            && self.mel_energy_score.is_finite()
    }
}

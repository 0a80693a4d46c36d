// Level metering - RMS, dBFS normalization and exponential smoothing
//
// The smoothed level is written only by the capture callback and read from
// any thread. It is stored as f32 bits in an AtomicU32 so both sides stay
// lock-free.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// dB value reported for a window with zero RMS
pub const SILENCE_DB: f32 = -100.0;

/// Bottom of the normalized range (-40 dBFS maps to 0.0, 0 dBFS to 1.0)
pub const LEVEL_FLOOR_DB: f32 = -40.0;

/// Weight of the newest window in the smoothed level
pub const SMOOTHING_FACTOR: f32 = 0.1;

/// Normalized level below which a window counts as silent for diagnostics
pub const SILENCE_LEVEL: f32 = 0.01;

/// Root mean square of `samples` (0.0 for an empty slice)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    energy.sqrt()
}

/// Convert an RMS amplitude to dBFS, or [`SILENCE_DB`] when it is zero
pub fn rms_to_db(rms: f32) -> f32 {
    if rms > 0.0 {
        20.0 * rms.log10()
    } else {
        SILENCE_DB
    }
}

/// Map dBFS onto [0, 1] with `(db + 40) / 40`
pub fn normalize_db(db: f32) -> f32 {
    ((db - LEVEL_FLOOR_DB) / -LEVEL_FLOOR_DB).clamp(0.0, 1.0)
}

/// Normalized (unsmoothed) level of one window
pub fn window_level(samples: &[f32]) -> f32 {
    normalize_db(rms_to_db(rms(samples)))
}

/// `0.1 * new + 0.9 * previous`
pub fn smooth(previous: f32, new: f32) -> f32 {
    SMOOTHING_FACTOR * new + (1.0 - SMOOTHING_FACTOR) * previous
}

/// Shared smoothed audio level in [0, 1]
///
/// Cloning shares the same underlying cell.
#[derive(Clone, Debug)]
pub struct AudioLevel {
    level_bits: Arc<AtomicU32>,
}

impl AudioLevel {
    pub fn new() -> Self {
        Self {
            level_bits: Arc::new(AtomicU32::new(0.0_f32.to_bits())),
        }
    }

    /// Most recently committed smoothed level
    pub fn get(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Acquire))
    }

    /// Fold a new window level into the smoothed value and return it
    pub fn update(&self, window_level: f32) -> f32 {
        let smoothed = smooth(self.get(), window_level).clamp(0.0, 1.0);
        self.level_bits.store(smoothed.to_bits(), Ordering::Release);
        smoothed
    }

    pub fn reset(&self) {
        self.level_bits.store(0.0_f32.to_bits(), Ordering::Release);
    }
}

impl Default for AudioLevel {
    fn default() -> Self {
        Self::new()
    }
}

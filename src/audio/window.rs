// AudioWindow - one 100 ms block of captured samples

use serde::{Deserialize, Serialize};

/// Window length in milliseconds
pub const WINDOW_DURATION_MS: u32 = 100;

/// Frames in one window at `sample_rate` (`sample_rate / 10`)
pub fn frames_per_window(sample_rate: u32) -> usize {
    (sample_rate as u64 * WINDOW_DURATION_MS as u64 / 1000) as usize
}

/// Immutable block of normalized mono samples.
///
/// Samples are owned by the window (copied out of the device buffer before
/// the capture callback returns). The sequence number is monotonic within a
/// capture session and makes superseded windows visible to diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioWindow {
    samples: Vec<f32>,
    sample_rate: u32,
    sequence: u64,
}

impl AudioWindow {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration covered by the samples, in milliseconds
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 * 1000.0 / self.sample_rate as f32
    }

    /// Give the backing buffer back (used to recycle pooled buffers)
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_per_window() {
        assert_eq!(frames_per_window(16_000), 1_600);
        assert_eq!(frames_per_window(44_100), 4_410);
        assert_eq!(frames_per_window(48_000), 4_800);
    }

    #[test]
    fn test_duration() {
        let window = AudioWindow::new(vec![0.0; 1_600], 16_000, 3);
        assert!((window.duration_ms() - 100.0).abs() < 1e-3);
        assert_eq!(window.sequence(), 3);
        assert_eq!(window.len(), 1_600);
    }

    #[test]
    fn test_zero_sample_rate_duration() {
        let window = AudioWindow::new(vec![0.0; 10], 0, 0);
        assert_eq!(window.duration_ms(), 0.0);
    }
}

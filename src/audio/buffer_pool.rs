// BufferPool - window handoff between the capture callback and the analysis thread
//
// A fixed set of window buffers circulates through two rtrb SPSC rings, so
// the capture callback never allocates or takes a lock.
//
// Rings:
// - data: filled windows, capture -> analysis
// - pool: empty buffers, analysis -> capture
//
// Lifecycle of one buffer:
// 1. Capture pops it from the pool ring (no free buffer means the window is dropped)
// 2. Capture copies a finished window into it and pushes it on the data ring
// 3. Analysis drains the data ring; every window but the newest goes straight back
// 4. The newest window is analyzed and its buffer then returned to the pool ring

use rtrb::{Consumer, Producer};

use super::window::AudioWindow;

/// Pool dimensions used when no configuration overrides them
pub const DEFAULT_BUFFER_COUNT: usize = 8;
pub const DEFAULT_BUFFER_SIZE: usize = 1600;

/// Backing storage of one window; capacity is reserved up front
pub type AudioBuffer = Vec<f32>;

/// A window in flight from the capture thread, with the smoothed level at capture time
#[derive(Debug)]
pub struct CapturedWindow {
    pub window: AudioWindow,
    pub level: f32,
}

/// Outcome of handing one window to the analysis side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    Delivered,
    /// Every buffer is in flight; the window was dropped
    PoolExhausted,
    /// Data queue full; the window was dropped and its buffer kept for reuse
    QueueFull,
}

/// All four ring ends, before they are handed to their threads
pub struct BufferPoolChannels {
    /// Producer for sending filled windows to analysis thread
    pub data_producer: Producer<CapturedWindow>,
    /// Consumer for receiving filled windows in analysis thread
    pub data_consumer: Consumer<CapturedWindow>,
    /// Producer for returning empty buffers from analysis thread
    pub pool_producer: Producer<AudioBuffer>,
    /// Consumer for retrieving empty buffers in capture thread
    pub pool_consumer: Consumer<AudioBuffer>,
}

impl BufferPoolChannels {
    /// Separate the capture-side and analysis-side halves
    pub fn split_for_threads(self) -> (CaptureThreadChannels, AnalysisThreadChannels) {
        (
            CaptureThreadChannels {
                data_producer: self.data_producer,
                pool_consumer: self.pool_consumer,
                spare: None,
            },
            AnalysisThreadChannels {
                data_consumer: self.data_consumer,
                pool_producer: self.pool_producer,
            },
        )
    }
}

/// Capture-thread half: pops empty buffers, pushes filled windows
pub struct CaptureThreadChannels {
    data_producer: Producer<CapturedWindow>,
    pool_consumer: Consumer<AudioBuffer>,
    /// Buffer held back after a failed push so it is not lost
    spare: Option<AudioBuffer>,
}

impl CaptureThreadChannels {
    /// Copy `frames` into a pooled buffer and push it to the analysis thread
    ///
    /// Never blocks and never allocates as long as `frames` fits in a pooled
    /// buffer's capacity.
    pub fn publish(
        &mut self,
        frames: &[f32],
        sample_rate: u32,
        sequence: u64,
        level: f32,
    ) -> Handoff {
        let mut buffer = match self.spare.take() {
            Some(buffer) => buffer,
            None => match self.pool_consumer.pop() {
                Ok(buffer) => buffer,
                Err(_) => return Handoff::PoolExhausted,
            },
        };

        buffer.clear();
        buffer.extend_from_slice(frames);

        let captured = CapturedWindow {
            window: AudioWindow::new(buffer, sample_rate, sequence),
            level,
        };

        match self.data_producer.push(captured) {
            Ok(()) => Handoff::Delivered,
            Err(rtrb::PushError::Full(rejected)) => {
                self.spare = Some(rejected.window.into_samples());
                Handoff::QueueFull
            }
        }
    }
}

/// Analysis-thread half: takes the newest window and recycles buffers
pub struct AnalysisThreadChannels {
    data_consumer: Consumer<CapturedWindow>,
    pool_producer: Producer<AudioBuffer>,
}

impl AnalysisThreadChannels {
    /// Drain the data queue and return the newest window
    ///
    /// Older windows are returned to the pool without being processed.
    ///
    /// # Returns
    /// The newest window (if any) and how many windows it superseded
    pub fn take_latest(&mut self) -> (Option<CapturedWindow>, u64) {
        let mut latest: Option<CapturedWindow> = None;
        let mut superseded = 0;

        while let Ok(captured) = self.data_consumer.pop() {
            if let Some(previous) = latest.replace(captured) {
                self.recycle(previous.window);
                superseded += 1;
            }
        }

        (latest, superseded)
    }

    /// Return a processed window's buffer to the pool
    pub fn recycle(&mut self, window: AudioWindow) {
        if self.pool_producer.push(window.into_samples()).is_err() {
            tracing::warn!("[AnalysisThread] Pool queue full, dropping buffer");
        }
    }
}

/// Builder for the pooled window rings
///
/// Every allocation happens in [`BufferPool::new`]; afterwards both halves
/// only move buffers between the rings.
pub struct BufferPool;

impl BufferPool {
    /// Allocate `buffer_count` buffers and queue them all as free
    ///
    /// # Arguments
    /// * `buffer_count` - Number of buffers to pre-allocate (typical: 4-16)
    /// * `buffer_size` - Capacity of each buffer in f32 samples (one window)
    ///
    /// # Panics
    /// If either argument is 0
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, buffer_size: usize) -> BufferPoolChannels {
        assert!(buffer_count > 0, "buffer_count must be greater than 0");
        assert!(buffer_size > 0, "buffer_size must be greater than 0");

        // Every filled window carries one pooled buffer, so both queues need
        // room for all of them at once
        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(buffer_count);

        for _ in 0..buffer_count {
            let buffer: AudioBuffer = Vec::with_capacity(buffer_size);
            if pool_producer.push(buffer).is_err() {
                break;
            }
        }

        BufferPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_creation() {
        let mut channels = BufferPool::new(8, 1600);

        let mut available_buffers = 0;
        while let Ok(buffer) = channels.pool_consumer.pop() {
            assert!(buffer.capacity() >= 1600, "Buffer capacity mismatch");
            assert!(buffer.is_empty());
            available_buffers += 1;
        }
        assert_eq!(available_buffers, 8, "Expected 8 buffers in pool queue");

        assert!(
            channels.data_consumer.pop().is_err(),
            "Data queue should be empty initially"
        );
    }

    #[test]
    fn test_publish_copies_frames() {
        let (mut capture, mut analysis) = BufferPool::new(2, 4).split_for_threads();

        let frames = [0.1, -0.2, 0.3, -0.4];
        assert_eq!(capture.publish(&frames, 16_000, 7, 0.25), Handoff::Delivered);

        let (latest, superseded) = analysis.take_latest();
        let captured = latest.expect("window should be delivered");
        assert_eq!(superseded, 0);
        assert_eq!(captured.window.samples(), &frames);
        assert_eq!(captured.window.sequence(), 7);
        assert_eq!(captured.window.sample_rate(), 16_000);
        assert_eq!(captured.level, 0.25);
    }

    #[test]
    fn test_latest_window_wins() {
        let (mut capture, mut analysis) = BufferPool::new(4, 2).split_for_threads();

        for seq in 0..3 {
            assert_eq!(
                capture.publish(&[seq as f32, 0.0], 16_000, seq, 0.0),
                Handoff::Delivered
            );
        }

        let (latest, superseded) = analysis.take_latest();
        let captured = latest.expect("newest window");
        assert_eq!(captured.window.sequence(), 2);
        assert_eq!(superseded, 2, "two older windows should be superseded");

        // Superseded buffers are already back; recycling the newest restores the pool
        analysis.recycle(captured.window);
        for seq in 10..14 {
            assert_eq!(capture.publish(&[0.0, 0.0], 16_000, seq, 0.0), Handoff::Delivered);
        }
    }

    #[test]
    fn test_pool_exhaustion_drops_window() {
        let (mut capture, mut analysis) = BufferPool::new(2, 2).split_for_threads();

        assert_eq!(capture.publish(&[1.0, 1.0], 16_000, 0, 0.0), Handoff::Delivered);
        assert_eq!(capture.publish(&[1.0, 1.0], 16_000, 1, 0.0), Handoff::Delivered);
        assert_eq!(
            capture.publish(&[1.0, 1.0], 16_000, 2, 0.0),
            Handoff::PoolExhausted,
            "third window has no free buffer"
        );

        let (latest, superseded) = analysis.take_latest();
        assert_eq!(latest.map(|c| c.window.sequence()), Some(1));
        assert_eq!(superseded, 1);
    }

    #[test]
    fn test_empty_queue_yields_nothing() {
        let (_capture, mut analysis) = BufferPool::new(1, 16).split_for_threads();
        let (latest, superseded) = analysis.take_latest();
        assert!(latest.is_none());
        assert_eq!(superseded, 0);
    }

    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        // Producer and Consumer are Send (can be moved between threads)
        // but not Sync (cannot be shared between threads via &T)
        assert_send::<CaptureThreadChannels>();
        assert_send::<AnalysisThreadChannels>();
        assert_send::<BufferPoolChannels>();
    }

    #[test]
    #[should_panic(expected = "buffer_count must be greater than 0")]
    fn test_zero_buffer_count_panics() {
        BufferPool::new(0, 1024);
    }

    #[test]
    #[should_panic(expected = "buffer_size must be greater than 0")]
    fn test_zero_buffer_size_panics() {
        BufferPool::new(16, 0);
    }

    #[test]
    fn test_default_constants() {
        let mut channels = BufferPool::new(DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE);
        let buffer = channels.pool_consumer.pop().unwrap();
        assert!(buffer.capacity() >= DEFAULT_BUFFER_SIZE);
    }
}

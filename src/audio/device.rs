//! Capture device abstractions.
//!
//! A [`CaptureBackend`] opens platform streams; each open stream is a
//! [`CaptureStream`] handle that the capture session drives. Backends call
//! [`DeviceCallbacks::on_data`] on their real-time thread and
//! [`DeviceCallbacks::on_error`] when the stream fails.

use crate::error::AudioError;

/// Format requested from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Preferred frames per callback (one 100 ms window)
    pub frames_per_callback: usize,
}

impl StreamParams {
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidStreamParams {
                reason: "sample rate must be greater than 0".to_string(),
            });
        }
        if self.channel_count == 0 {
            return Err(AudioError::InvalidStreamParams {
                reason: "channel count must be greater than 0".to_string(),
            });
        }
        if self.frames_per_callback == 0 {
            return Err(AudioError::InvalidStreamParams {
                reason: format!("sample rate {} yields empty windows", self.sample_rate),
            });
        }
        Ok(())
    }
}

/// Returned by the data callback to keep or end the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Receives interleaved frames: `(buffer, frame_count)`
pub type DataCallback = Box<dyn FnMut(&[f32], usize) -> CallbackAction + Send>;

/// Receives stream failures
pub type ErrorCallback = Box<dyn FnMut(AudioError) + Send>;

/// Callbacks registered with a stream at open time
pub struct DeviceCallbacks {
    pub on_data: DataCallback,
    pub on_error: ErrorCallback,
}

/// Platform audio input
pub trait CaptureBackend: Send + Sync {
    /// Open a stream without starting it
    fn open(
        &self,
        params: StreamParams,
        callbacks: DeviceCallbacks,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;

    fn name(&self) -> &str;
}

/// Handle to one open stream
pub trait CaptureStream: Send {
    fn request_start(&mut self) -> Result<(), AudioError>;
    fn request_stop(&mut self) -> Result<(), AudioError>;
    fn request_pause(&mut self) -> Result<(), AudioError>;
    /// Release the stream; callbacks are dropped and never invoked again
    fn close(&mut self);
}

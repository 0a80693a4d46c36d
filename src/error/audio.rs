// Capture, engine and per-window processing errors

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the codes reported by [`AudioError::code`],
/// shared with hosts that only see the numeric value.
///
/// Error code range: 1001-1010
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Capture device could not be opened
    pub const DEVICE_OPEN_FAILED: i32 = 1001;

    /// Capture device could not be started or resumed
    pub const DEVICE_START_FAILED: i32 = 1002;

    /// Engine used before `initialize()` (or after `release()`)
    pub const NOT_INITIALIZED: i32 = 1003;

    /// Sample rate or channel count is zero
    pub const INVALID_STREAM_PARAMS: i32 = 1004;

    /// Capture stream reported an error while running
    pub const STREAM_FAILURE: i32 = 1005;

    /// Unexpected fault while handling a window
    pub const PROCESSING_FAILED: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// Analysis thread could not be spawned
    pub const WORKER_SPAWN_FAILED: i32 = 1008;

    /// Microphone permission denied
    pub const PERMISSION_DENIED: i32 = 1009;

    /// Device offers no sample format we can read
    pub const UNSUPPORTED_FORMAT: i32 = 1010;
}

/// Log `err` at error level with its code and the calling `context`
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=DetectionEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Capture and engine errors
///
/// `DeviceOpenFailed` and `DeviceStartFailed` are the DeviceError family;
/// `ProcessingFailed` is raised by the analysis thread for a single window
/// and never escapes it except as an `Error` event.
///
/// Error code ranges: 1001-1010
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Capture device could not be opened
    DeviceOpenFailed { reason: String },

    /// Capture device could not be started or resumed
    DeviceStartFailed { reason: String },

    /// Engine has no active session
    NotInitialized,

    /// Sample rate or channel count is unusable
    InvalidStreamParams { reason: String },

    /// Stream reported an error or disconnected
    StreamFailure { reason: String },

    /// Fault while extracting features or classifying a window
    ProcessingFailed { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Analysis thread could not be spawned
    WorkerSpawnFailed { reason: String },

    /// Microphone permission denied
    PermissionDenied,

    /// Device sample format not supported
    UnsupportedFormat { reason: String },
}

impl AudioError {
    /// True for the errors a host should treat as "capture unavailable".
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceOpenFailed { .. }
                | AudioError::DeviceStartFailed { .. }
                | AudioError::PermissionDenied
                | AudioError::UnsupportedFormat { .. }
                | AudioError::InvalidStreamParams { .. }
        )
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::DeviceOpenFailed { .. } => AudioErrorCodes::DEVICE_OPEN_FAILED,
            AudioError::DeviceStartFailed { .. } => AudioErrorCodes::DEVICE_START_FAILED,
            AudioError::NotInitialized => AudioErrorCodes::NOT_INITIALIZED,
            AudioError::InvalidStreamParams { .. } => AudioErrorCodes::INVALID_STREAM_PARAMS,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
            AudioError::ProcessingFailed { .. } => AudioErrorCodes::PROCESSING_FAILED,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::WorkerSpawnFailed { .. } => AudioErrorCodes::WORKER_SPAWN_FAILED,
            AudioError::PermissionDenied => AudioErrorCodes::PERMISSION_DENIED,
            AudioError::UnsupportedFormat { .. } => AudioErrorCodes::UNSUPPORTED_FORMAT,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::DeviceOpenFailed { reason } => {
                format!("Failed to open capture device: {}", reason)
            }
            AudioError::DeviceStartFailed { reason } => {
                format!("Failed to start capture: {}", reason)
            }
            AudioError::NotInitialized => {
                "Engine not initialized. Call initialize() first.".to_string()
            }
            AudioError::InvalidStreamParams { reason } => {
                format!("Invalid stream parameters: {}", reason)
            }
            AudioError::StreamFailure { reason } => format!("Capture stream failure: {}", reason),
            AudioError::ProcessingFailed { reason } => {
                format!("Window processing failed: {}", reason)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
            AudioError::WorkerSpawnFailed { reason } => {
                format!("Failed to spawn analysis thread: {}", reason)
            }
            AudioError::PermissionDenied => "Microphone permission denied".to_string(),
            AudioError::UnsupportedFormat { reason } => {
                format!("Unsupported sample format: {}", reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

/// Convert from std::io::Error to AudioError
impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::StreamFailure {
            reason: err.to_string(),
        }
    }
}

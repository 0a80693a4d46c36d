// Audio module - device capture, windowing and level metering

pub mod buffer_pool;
pub mod capture;
pub mod cpal_backend;
pub mod device;
pub mod level;
pub mod synthetic;
pub mod window;

// Re-export commonly used types for convenience
pub use buffer_pool::{
    AnalysisThreadChannels, AudioBuffer, BufferPool, BufferPoolChannels, CaptureThreadChannels,
    CapturedWindow, Handoff, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE,
};
pub use capture::{CaptureSession, CaptureWiring, FrameProcessor, WindowSink};
pub use cpal_backend::CpalBackend;
pub use device::{
    CallbackAction, CaptureBackend, CaptureStream, DataCallback, DeviceCallbacks, ErrorCallback,
    StreamParams,
};
pub use level::AudioLevel;
pub use synthetic::{Pacing, Signal, SyntheticBackend};
pub use window::{frames_per_window, AudioWindow, WINDOW_DURATION_MS};

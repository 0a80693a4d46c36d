// CaptureSession - device lifecycle, windowing and level metering
//
// The session owns the open stream handle. The real-time part lives in
// FrameProcessor, which is moved into the device's data callback:
//
// device callback → FrameProcessor::on_frames
//   → first channel appended to a pre-allocated accumulator
//   → when a full window (sample_rate / 10 frames) is collected:
//       RMS → dBFS → normalized level → smoothed level
//       WindowSink::on_window(frames, level)
//
// Nothing on that path locks or allocates. Control operations (start, stop,
// pause, resume, release) run on the caller's thread and talk to the
// callback only through atomics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::device::{
    CallbackAction, CaptureBackend, CaptureStream, DeviceCallbacks, ErrorCallback, StreamParams,
};
use super::level::{window_level, AudioLevel};
use super::window::frames_per_window;
use crate::error::{log_audio_error, AudioError};
use crate::telemetry::SessionStats;

/// Destination for completed windows, called on the capture thread
///
/// `frames` is only valid for the duration of the call; implementations
/// must copy what they keep.
pub trait WindowSink: Send {
    fn on_window(&mut self, frames: &[f32], sample_rate: u32, sequence: u64, level: f32);
}

/// Real-time half of the capture session
pub struct FrameProcessor {
    sample_rate: u32,
    channel_count: usize,
    frames_per_window: usize,
    accumulator: Vec<f32>,
    sequence: u64,
    level: AudioLevel,
    recording: Arc<AtomicBool>,
    sink: Box<dyn WindowSink>,
    stats: Arc<SessionStats>,
}

impl FrameProcessor {
    pub fn new(
        params: StreamParams,
        level: AudioLevel,
        recording: Arc<AtomicBool>,
        sink: Box<dyn WindowSink>,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            sample_rate: params.sample_rate,
            channel_count: params.channel_count.max(1) as usize,
            frames_per_window: params.frames_per_callback,
            accumulator: Vec::with_capacity(params.frames_per_callback),
            sequence: 0,
            level,
            recording,
            sink,
            stats,
        }
    }

    /// Handle one device buffer of `frame_count` interleaved frames
    ///
    /// Zero-length buffers are ignored. While not recording, input is
    /// discarded along with any partially filled window.
    pub fn on_frames(&mut self, raw: &[f32], frame_count: usize) -> CallbackAction {
        if frame_count == 0 || raw.is_empty() {
            return CallbackAction::Continue;
        }

        if !self.recording.load(Ordering::Acquire) {
            self.accumulator.clear();
            return CallbackAction::Continue;
        }

        // De-interleave: take first channel
        for frame in raw.chunks(self.channel_count).take(frame_count) {
            self.accumulator.push(frame.first().copied().unwrap_or(0.0));
            if self.accumulator.len() == self.frames_per_window {
                self.complete_window();
            }
        }

        CallbackAction::Continue
    }

    fn complete_window(&mut self) {
        let smoothed = self.level.update(window_level(&self.accumulator));
        let sequence = self.sequence;
        self.sequence += 1;
        self.stats.record_captured();

        self.sink
            .on_window(&self.accumulator, self.sample_rate, sequence, smoothed);
        self.accumulator.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Armed,
    Recording,
    Paused,
    Released,
}

/// Everything the real-time callback reports into
pub struct CaptureWiring {
    pub sink: Box<dyn WindowSink>,
    /// Smoothed level written by the callback; reset on open and on stop
    pub level: AudioLevel,
    pub stats: Arc<SessionStats>,
    /// Called after recording is marked stopped, when the stream fails
    pub on_error: ErrorCallback,
}

/// Owns one open capture stream for the lifetime of an engine session
pub struct CaptureSession {
    stream: Option<Box<dyn CaptureStream>>,
    params: StreamParams,
    level: AudioLevel,
    recording: Arc<AtomicBool>,
    phase: Phase,
}

impl CaptureSession {
    /// Open the device sized to 100 ms windows; the session is armed, not recording
    ///
    /// # Arguments
    /// * `backend` - Capture device collaborator
    /// * `sample_rate` / `channel_count` - Requested format
    /// * `wiring` - Where windows, level, counters and stream errors go
    ///
    /// # Returns
    /// The armed session, or a DeviceError if the device cannot be opened
    pub fn initialize(
        backend: &dyn CaptureBackend,
        sample_rate: u32,
        channel_count: u16,
        wiring: CaptureWiring,
    ) -> Result<Self, AudioError> {
        let params = StreamParams {
            sample_rate,
            channel_count,
            frames_per_callback: frames_per_window(sample_rate),
        };
        params.validate()?;

        let CaptureWiring {
            sink,
            level,
            stats,
            mut on_error,
        } = wiring;
        level.reset();
        let recording = Arc::new(AtomicBool::new(false));

        let mut processor =
            FrameProcessor::new(params, level.clone(), Arc::clone(&recording), sink, stats);
        let error_flag = Arc::clone(&recording);

        let callbacks = DeviceCallbacks {
            on_data: Box::new(move |raw: &[f32], frame_count: usize| {
                processor.on_frames(raw, frame_count)
            }),
            on_error: Box::new(move |err: AudioError| {
                error_flag.store(false, Ordering::Release);
                on_error(err);
            }),
        };

        let stream = backend.open(params, callbacks).map_err(|err| {
            log_audio_error(&err, "CaptureSession::initialize");
            err
        })?;

        log::info!(
            "[CaptureSession] Opened '{}' at {} Hz, {} channel(s), {} frames per window",
            backend.name(),
            sample_rate,
            channel_count,
            params.frames_per_callback
        );

        Ok(Self {
            stream: Some(stream),
            params,
            level,
            recording,
            phase: Phase::Armed,
        })
    }

    /// Begin recording; idempotent while already recording
    pub fn start(&mut self) -> Result<(), AudioError> {
        match self.phase {
            Phase::Recording if self.is_recording() => Ok(()),
            Phase::Released => Err(AudioError::NotInitialized),
            // Recording without the flag means the device failed; restart it
            Phase::Armed | Phase::Paused | Phase::Recording => {
                let stream = self.stream.as_mut().ok_or(AudioError::NotInitialized)?;
                self.recording.store(true, Ordering::Release);
                if let Err(err) = stream.request_start() {
                    self.recording.store(false, Ordering::Release);
                    log_audio_error(&err, "CaptureSession::start");
                    return Err(err);
                }
                self.phase = Phase::Recording;
                log::info!("[CaptureSession] Recording started");
                Ok(())
            }
        }
    }

    /// Stop recording and reset the smoothed level to 0
    pub fn stop(&mut self) -> Result<(), AudioError> {
        self.recording.store(false, Ordering::Release);
        let result = match (self.phase, self.stream.as_mut()) {
            (Phase::Recording | Phase::Paused, Some(stream)) => stream.request_stop(),
            _ => Ok(()),
        };
        self.level.reset();
        if self.phase != Phase::Released {
            self.phase = Phase::Armed;
        }
        if let Err(err) = &result {
            log_audio_error(err, "CaptureSession::stop");
        } else {
            log::info!("[CaptureSession] Recording stopped");
        }
        result
    }

    /// Pause recording; no-op unless recording
    pub fn pause(&mut self) -> Result<(), AudioError> {
        if self.phase != Phase::Recording {
            return Ok(());
        }
        self.recording.store(false, Ordering::Release);
        if let Some(stream) = self.stream.as_mut() {
            if let Err(err) = stream.request_pause() {
                // Device is still delivering; keep publishing windows
                self.recording.store(true, Ordering::Release);
                log_audio_error(&err, "CaptureSession::pause");
                return Err(err);
            }
        }
        self.phase = Phase::Paused;
        log::info!("[CaptureSession] Recording paused");
        Ok(())
    }

    /// Resume recording; no-op unless paused
    pub fn resume(&mut self) -> Result<(), AudioError> {
        if self.phase != Phase::Paused {
            return Ok(());
        }
        self.start()?;
        log::info!("[CaptureSession] Recording resumed");
        Ok(())
    }

    /// Stop if recording, close the device and drop the sink
    pub fn release(&mut self) {
        if self.phase == Phase::Released {
            return;
        }
        let _ = self.stop();
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.phase = Phase::Released;
        log::info!("[CaptureSession] Released");
    }

    /// Most recent smoothed level
    pub fn level(&self) -> f32 {
        self.level.get()
    }

    /// Shared handle to the smoothed level
    pub fn level_handle(&self) -> AudioLevel {
        self.level.clone()
    }

    /// False after pause/stop and after a device error
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    pub fn params(&self) -> StreamParams {
        self.params
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

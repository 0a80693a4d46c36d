//! Synthetic capture backend used for deterministic testing and CLI tooling.
//!
//! A generator thread plays a [`Signal`] through the registered data
//! callback in fixed-size callbacks, either paced or as fast as the
//! consumer allows. WAV files are decoded up front with `hound` and played
//! back as a signal. Failure injection (open, start, mid-stream error)
//! exercises the engine's device error paths without real hardware.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::device::{
    CallbackAction, CaptureBackend, CaptureStream, DeviceCallbacks, StreamParams,
};
use crate::error::AudioError;

/// Signal played by the synthetic device (mono; copied to every channel)
#[derive(Debug, Clone)]
pub enum Signal {
    Silence,
    Tone { frequency_hz: f32, amplitude: f32 },
    /// Uniform white noise in `[-amplitude, amplitude]`, seeded for repeatability
    Noise { amplitude: f32, seed: u64 },
    /// Pre-recorded samples; the stream finishes at the end unless `looping`
    Samples { samples: Arc<Vec<f32>>, looping: bool },
}

impl Signal {
    /// Decode a WAV file into a non-looping [`Signal::Samples`]
    ///
    /// Only the first channel is kept.
    ///
    /// # Returns
    /// The signal and the file's sample rate
    pub fn from_wav(path: &Path) -> Result<(Signal, u32), AudioError> {
        let (samples, sample_rate) = read_wav(path)?;
        Ok((
            Signal::Samples {
                samples: Arc::new(samples),
                looping: false,
            },
            sample_rate,
        ))
    }
}

/// How quickly callbacks are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One callback per callback-duration of audio
    RealTime,
    /// Fixed gap between callbacks
    Interval(Duration),
}

/// Progress shared between the backend and its generator threads
#[derive(Debug, Default)]
pub struct SyntheticProgress {
    callbacks_delivered: AtomicU64,
    finished: AtomicBool,
}

impl SyntheticProgress {
    pub fn callbacks_delivered(&self) -> u64 {
        self.callbacks_delivered.load(Ordering::Acquire)
    }

    /// True once a non-looping signal has been fully delivered
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Deterministic in-process capture device
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    signal: Signal,
    pacing: Pacing,
    callback_frames: Option<usize>,
    fail_open: Option<String>,
    fail_start: Option<String>,
    fail_pause: Option<String>,
    error_after_callbacks: Option<u64>,
    progress: Arc<SyntheticProgress>,
}

impl SyntheticBackend {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            pacing: Pacing::Interval(Duration::from_millis(5)),
            callback_frames: None,
            fail_open: None,
            fail_start: None,
            fail_pause: None,
            error_after_callbacks: None,
            progress: Arc::new(SyntheticProgress::default()),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Deliver callbacks of this many frames instead of one window each
    pub fn with_callback_frames(mut self, frames: usize) -> Self {
        self.callback_frames = Some(frames.max(1));
        self
    }

    /// Make `open` fail with a DeviceError
    pub fn failing_open(mut self, reason: impl Into<String>) -> Self {
        self.fail_open = Some(reason.into());
        self
    }

    /// Make `request_start` fail with a DeviceError
    pub fn failing_start(mut self, reason: impl Into<String>) -> Self {
        self.fail_start = Some(reason.into());
        self
    }

    /// Make `request_pause` fail and leave the stream running
    pub fn failing_pause(mut self, reason: impl Into<String>) -> Self {
        self.fail_pause = Some(reason.into());
        self
    }

    /// Report a stream failure through `on_error` after `callbacks` deliveries
    pub fn with_error_after(mut self, callbacks: u64) -> Self {
        self.error_after_callbacks = Some(callbacks);
        self
    }

    pub fn progress(&self) -> Arc<SyntheticProgress> {
        Arc::clone(&self.progress)
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(
        &self,
        params: StreamParams,
        callbacks: DeviceCallbacks,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        params.validate()?;
        if let Some(reason) = &self.fail_open {
            return Err(AudioError::DeviceOpenFailed {
                reason: reason.clone(),
            });
        }

        let shared = Arc::new(StreamShared {
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        let frames = self.callback_frames.unwrap_or(params.frames_per_callback);
        let gap = match self.pacing {
            Pacing::RealTime => {
                Duration::from_secs_f64(frames as f64 / params.sample_rate as f64)
            }
            Pacing::Interval(gap) => gap,
        };

        let generator = Generator {
            source: SignalCursor::new(self.signal.clone(), params.sample_rate),
            channels: params.channel_count.max(1) as usize,
            frames,
            gap,
            error_after: self.error_after_callbacks,
            callbacks,
            shared: Arc::clone(&shared),
            progress: Arc::clone(&self.progress),
        };

        let handle = thread::Builder::new()
            .name("cough-synthetic-capture".to_string())
            .spawn(move || generator.run())
            .map_err(|e| AudioError::DeviceOpenFailed {
                reason: format!("Failed to spawn synthetic capture thread: {}", e),
            })?;

        Ok(Box::new(SyntheticStream {
            shared,
            handle: Some(handle),
            fail_start: self.fail_start.clone(),
            fail_pause: self.fail_pause.clone(),
        }))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[derive(Debug)]
struct StreamShared {
    running: AtomicBool,
    closed: AtomicBool,
}

struct SyntheticStream {
    shared: Arc<StreamShared>,
    handle: Option<JoinHandle<()>>,
    fail_start: Option<String>,
    fail_pause: Option<String>,
}

impl CaptureStream for SyntheticStream {
    fn request_start(&mut self) -> Result<(), AudioError> {
        if let Some(reason) = &self.fail_start {
            return Err(AudioError::DeviceStartFailed {
                reason: reason.clone(),
            });
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(AudioError::NotInitialized);
        }
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn request_stop(&mut self) -> Result<(), AudioError> {
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }

    fn request_pause(&mut self) -> Result<(), AudioError> {
        if let Some(reason) = &self.fail_pause {
            return Err(AudioError::StreamFailure {
                reason: reason.clone(),
            });
        }
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.closed.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.close();
    }
}

struct Generator {
    source: SignalCursor,
    channels: usize,
    frames: usize,
    gap: Duration,
    error_after: Option<u64>,
    callbacks: DeviceCallbacks,
    shared: Arc<StreamShared>,
    progress: Arc<SyntheticProgress>,
}

impl Generator {
    fn run(mut self) {
        let mut interleaved = vec![0.0_f32; self.frames * self.channels];
        let mut mono = vec![0.0_f32; self.frames];
        let mut delivered: u64 = 0;
        let mut ended = false;

        while !self.shared.closed.load(Ordering::Acquire) {
            if ended || !self.shared.running.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
                continue;
            }

            if self.error_after == Some(delivered) {
                (self.callbacks.on_error)(AudioError::StreamFailure {
                    reason: "synthetic device disconnected".to_string(),
                });
                ended = true;
                continue;
            }

            let produced = self.source.fill(&mut mono);
            for (frame, &sample) in interleaved.chunks_mut(self.channels).zip(mono.iter()) {
                frame.fill(sample);
            }

            if produced > 0 {
                let data = &interleaved[..produced * self.channels];
                let action = (self.callbacks.on_data)(data, produced);
                delivered += 1;
                self.progress
                    .callbacks_delivered
                    .store(delivered, Ordering::Release);
                if action == CallbackAction::Stop {
                    ended = true;
                }
            }

            if produced < self.frames {
                ended = true;
                self.progress.finished.store(true, Ordering::Release);
                continue;
            }

            thread::sleep(self.gap);
        }
        // The sink and error handler drop with `self` once the stream is closed
    }
}

/// Position within a [`Signal`]
struct SignalCursor {
    signal: Signal,
    sample_rate: u32,
    position: u64,
    rng: StdRng,
}

impl SignalCursor {
    fn new(signal: Signal, sample_rate: u32) -> Self {
        let seed = match &signal {
            Signal::Noise { seed, .. } => *seed,
            _ => 42,
        };
        Self {
            signal,
            sample_rate,
            position: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fill `out` and return how many samples were produced
    ///
    /// Fewer than `out.len()` means a finite signal ended; the rest of `out`
    /// is zeroed.
    fn fill(&mut self, out: &mut [f32]) -> usize {
        let produced = match &self.signal {
            Signal::Silence => {
                out.fill(0.0);
                out.len()
            }
            Signal::Tone {
                frequency_hz,
                amplitude,
            } => {
                let step =
                    2.0 * std::f64::consts::PI * *frequency_hz as f64 / self.sample_rate as f64;
                for (i, sample) in out.iter_mut().enumerate() {
                    let n = (self.position + i as u64) as f64;
                    *sample = (amplitude * (step * n).sin() as f32).clamp(-1.0, 1.0);
                }
                out.len()
            }
            Signal::Noise { amplitude, .. } => {
                let amplitude = *amplitude;
                for sample in out.iter_mut() {
                    *sample = amplitude * self.rng.gen_range(-1.0_f32..=1.0);
                }
                out.len()
            }
            Signal::Samples { samples, looping } => {
                if samples.is_empty() {
                    out.fill(0.0);
                    0
                } else if *looping {
                    let len = samples.len() as u64;
                    for (i, sample) in out.iter_mut().enumerate() {
                        *sample = samples[((self.position + i as u64) % len) as usize];
                    }
                    out.len()
                } else {
                    let start = (self.position as usize).min(samples.len());
                    let available = (samples.len() - start).min(out.len());
                    out[..available].copy_from_slice(&samples[start..start + available]);
                    out[available..].fill(0.0);
                    available
                }
            }
        };
        self.position += produced as u64;
        produced
    }
}

fn read_wav(path: &Path) -> Result<(Vec<f32>, u32), AudioError> {
    let mut reader = hound::WavReader::open(path).map_err(|err| AudioError::StreamFailure {
        reason: format!("failed to open {}: {err}", path.display()),
    })?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AudioError::StreamFailure {
            reason: format!("{} has zero channels", path.display()),
        });
    }
    let channels = spec.channels as usize;

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| {
                sample.map_err(|err| AudioError::StreamFailure {
                    reason: format!("error reading {}: {err}", path.display()),
                })
            })
            .collect::<Result<Vec<f32>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = match spec.bits_per_sample {
                8 | 16 | 24 | 32 => (1_i64 << (spec.bits_per_sample - 1)) as f32,
                bits => {
                    return Err(AudioError::UnsupportedFormat {
                        reason: format!(
                            "unsupported bits_per_sample={} for {}",
                            bits,
                            path.display()
                        ),
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|sample| {
                    sample
                        .map(|v| v as f32 / scale)
                        .map_err(|err| AudioError::StreamFailure {
                            reason: format!("error reading {}: {err}", path.display()),
                        })
                })
                .collect::<Result<Vec<f32>, _>>()?
        }
    };

    let mono = interleaved.chunks(channels).map(|frame| frame[0]).collect();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn params() -> StreamParams {
        StreamParams {
            sample_rate: 16_000,
            channel_count: 1,
            frames_per_callback: 1_600,
        }
    }

    fn counting_callbacks(count: Arc<AtomicUsize>, errors: Arc<AtomicUsize>) -> DeviceCallbacks {
        DeviceCallbacks {
            on_data: Box::new(move |_data: &[f32], frames: usize| {
                count.fetch_add(frames, Ordering::SeqCst);
                CallbackAction::Continue
            }),
            on_error: Box::new(move |_err| {
                errors.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_no_data_until_started() {
        let frames = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let backend = SyntheticBackend::new(Signal::Silence);
        let mut stream = backend
            .open(params(), counting_callbacks(Arc::clone(&frames), errors))
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(frames.load(Ordering::SeqCst), 0);

        stream.request_start().unwrap();
        assert!(wait_for(|| frames.load(Ordering::SeqCst) >= 1_600));
        stream.close();
    }

    #[test]
    fn test_finite_samples_finish() {
        let frames = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let signal = Signal::Samples {
            samples: Arc::new(vec![0.1; 4_000]),
            looping: false,
        };
        let backend = SyntheticBackend::new(signal).with_pacing(Pacing::Interval(Duration::ZERO));
        let progress = backend.progress();
        let mut stream = backend
            .open(params(), counting_callbacks(Arc::clone(&frames), errors))
            .unwrap();
        stream.request_start().unwrap();

        assert!(wait_for(|| progress.is_finished()));
        assert_eq!(frames.load(Ordering::SeqCst), 4_000);
        assert_eq!(progress.callbacks_delivered(), 3);
        stream.close();
    }

    #[test]
    fn test_error_injection() {
        let frames = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let backend = SyntheticBackend::new(Signal::Silence).with_error_after(2);
        let mut stream = backend
            .open(params(), counting_callbacks(Arc::clone(&frames), Arc::clone(&errors)))
            .unwrap();
        stream.request_start().unwrap();

        assert!(wait_for(|| errors.load(Ordering::SeqCst) == 1));
        assert_eq!(frames.load(Ordering::SeqCst), 3_200);
        stream.close();
    }

    #[test]
    fn test_open_failure() {
        let backend = SyntheticBackend::new(Signal::Silence).failing_open("unplugged");
        let result = backend.open(
            params(),
            counting_callbacks(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0))),
        );
        assert!(matches!(result, Err(AudioError::DeviceOpenFailed { .. })));
    }

    #[test]
    fn test_tone_cursor_is_continuous() {
        let mut cursor = SignalCursor::new(
            Signal::Tone {
                frequency_hz: 1_000.0,
                amplitude: 0.5,
            },
            16_000,
        );
        let mut first = vec![0.0; 8];
        let mut second = vec![0.0; 8];
        cursor.fill(&mut first);
        cursor.fill(&mut second);

        let mut reference = SignalCursor::new(
            Signal::Tone {
                frequency_hz: 1_000.0,
                amplitude: 0.5,
            },
            16_000,
        );
        let mut joined = vec![0.0; 16];
        reference.fill(&mut joined);
        assert_eq!(&joined[..8], &first[..]);
        assert_eq!(&joined[8..], &second[..]);
    }

    #[test]
    fn test_noise_is_seeded() {
        let signal = Signal::Noise {
            amplitude: 0.3,
            seed: 7,
        };
        let mut a = SignalCursor::new(signal.clone(), 16_000);
        let mut b = SignalCursor::new(signal, 16_000);
        let mut buf_a = vec![0.0; 64];
        let mut buf_b = vec![0.0; 64];
        a.fill(&mut buf_a);
        b.fill(&mut buf_b);
        assert_eq!(buf_a, buf_b);
        assert!(buf_a.iter().all(|s| s.abs() <= 0.3));
    }

    #[test]
    fn test_wav_roundtrip_reads_first_channel() {
        let path = std::env::temp_dir().join(format!(
            "cough_detect_synthetic_{}.wav",
            std::process::id()
        ));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for _ in 0..10 {
                writer.write_sample(16_384_i16).unwrap();
                writer.write_sample(-32_768_i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let (signal, sample_rate) = Signal::from_wav(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(sample_rate, 16_000);
        match signal {
            Signal::Samples { samples, looping } => {
                assert!(!looping);
                assert_eq!(samples.len(), 10);
                assert!(samples.iter().all(|&s| (s - 0.5).abs() < 1e-4));
            }
            other => panic!("expected samples, got {:?}", other),
        }
    }
}

// CpalBackend - capture device collaborator backed by cpal
//
// cpal::Stream is not Send, so each opened stream lives on its own
// "stream owner" thread. The returned handle forwards start/pause/stop/close
// requests over a channel and waits for the result, which keeps the handle
// Send and lets the engine drive it from any control thread.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::device::{
    CallbackAction, CaptureBackend, CaptureStream, DataCallback, DeviceCallbacks, ErrorCallback,
    StreamParams,
};
use crate::error::AudioError;

enum StreamCommand {
    Start,
    Pause,
    Stop,
    Close,
}

type CommandReply = mpsc::Sender<Result<(), AudioError>>;

/// Opens input streams on the default (or a named) cpal input device
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the input device whose name matches exactly
    pub fn with_device_name(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    /// Names of the available input devices on the default host
    pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AudioError::DeviceOpenFailed {
                reason: format!("Failed to enumerate input devices: {}", e),
            })?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }

    /// Sample rate of the default input configuration
    pub fn default_sample_rate() -> Result<u32, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceOpenFailed {
                reason: "No default input device found".to_string(),
            })?;
        let config = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceOpenFailed {
                reason: format!("Failed to get default input config: {:?}", e),
            })?;
        Ok(config.sample_rate().0)
    }
}

impl CaptureBackend for CpalBackend {
    fn open(
        &self,
        params: StreamParams,
        callbacks: DeviceCallbacks,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        params.validate()?;

        let (command_tx, command_rx) = mpsc::channel::<(StreamCommand, CommandReply)>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();
        let device_name = self.device_name.clone();

        let owner = thread::Builder::new()
            .name("cough-capture-stream".to_string())
            .spawn(move || {
                let stream = match build_input_stream(device_name.as_deref(), params, callbacks) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok((command, reply)) = command_rx.recv() {
                    let result = match command {
                        StreamCommand::Start => stream.play().map_err(map_play_error),
                        StreamCommand::Pause | StreamCommand::Stop => {
                            stream.pause().map_err(|e| AudioError::StreamFailure {
                                reason: e.to_string(),
                            })
                        }
                        StreamCommand::Close => {
                            let _ = reply.send(Ok(()));
                            break;
                        }
                    };
                    let _ = reply.send(result);
                }

                drop(stream);
                log::debug!("[CpalBackend] Stream owner thread exiting");
            })
            .map_err(|e| AudioError::DeviceOpenFailed {
                reason: format!("Failed to spawn stream thread: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                command_tx: Some(command_tx),
                owner: Some(owner),
            })),
            Ok(Err(err)) => {
                let _ = owner.join();
                Err(err)
            }
            Err(_) => {
                let _ = owner.join();
                Err(AudioError::DeviceOpenFailed {
                    reason: "stream thread exited before reporting".to_string(),
                })
            }
        }
    }

    fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or("cpal default input")
    }
}

struct CpalStream {
    command_tx: Option<mpsc::Sender<(StreamCommand, CommandReply)>>,
    owner: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn send(&self, command: StreamCommand) -> Result<(), AudioError> {
        let command_tx = self.command_tx.as_ref().ok_or(AudioError::NotInitialized)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        command_tx
            .send((command, reply_tx))
            .map_err(|_| AudioError::StreamFailure {
                reason: "stream thread is gone".to_string(),
            })?;
        reply_rx.recv().map_err(|_| AudioError::StreamFailure {
            reason: "stream thread did not reply".to_string(),
        })?
    }
}

impl CaptureStream for CpalStream {
    fn request_start(&mut self) -> Result<(), AudioError> {
        self.send(StreamCommand::Start)
    }

    fn request_stop(&mut self) -> Result<(), AudioError> {
        self.send(StreamCommand::Stop)
    }

    fn request_pause(&mut self) -> Result<(), AudioError> {
        self.send(StreamCommand::Pause)
    }

    fn close(&mut self) {
        if self.command_tx.is_some() {
            let _ = self.send(StreamCommand::Close);
        }
        self.command_tx = None;
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceOpenFailed {
                reason: "No default input device found".to_string(),
            }),
        Some(wanted) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceOpenFailed {
                    reason: format!("Failed to enumerate input devices: {}", e),
                })?;
            devices
                .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceOpenFailed {
                    reason: format!("Input device '{}' not found", wanted),
                })
        }
    }
}

/// Pick a supported configuration that covers the requested rate
fn select_config(
    device: &cpal::Device,
    params: StreamParams,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let target = cpal::SampleRate(params.sample_rate);
    let ranges = device
        .supported_input_configs()
        .map_err(map_query_error)?;

    let mut best: Option<cpal::SupportedStreamConfigRange> = None;
    for range in ranges {
        if range.min_sample_rate() > target || range.max_sample_rate() < target {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                // Prefer the requested channel count, then f32 samples
                let exact = range.channels() == params.channel_count;
                let current_exact = current.channels() == params.channel_count;
                (exact && !current_exact)
                    || (exact == current_exact
                        && range.sample_format() == cpal::SampleFormat::F32
                        && current.sample_format() != cpal::SampleFormat::F32)
            }
        };
        if better {
            best = Some(range);
        }
    }

    best.map(|range| range.with_sample_rate(target))
        .ok_or_else(|| AudioError::DeviceOpenFailed {
            reason: format!("Device does not support {} Hz capture", params.sample_rate),
        })
}

fn build_input_stream(
    device_name: Option<&str>,
    params: StreamParams,
    callbacks: DeviceCallbacks,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;
    let supported = select_config(&device, params)?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    log::info!(
        "[CpalBackend] Opening {:?} at {} Hz, {} channel(s), format {:?}",
        device.name().unwrap_or_default(),
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format
    );

    let DeviceCallbacks { on_data, on_error } = callbacks;

    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, on_data, on_error),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, on_data, on_error),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, on_data, on_error),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, on_data, on_error),
        other => Err(AudioError::UnsupportedFormat {
            reason: format!("{:?}", other),
        }),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut on_data: DataCallback,
    mut on_error: ErrorCallback,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    // Grows to the largest callback size once, then is reused
    let mut converted: Vec<f32> = Vec::new();
    let mut stopped = false;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if stopped {
                    return;
                }
                converted.clear();
                converted.extend(data.iter().map(|&s| <f32 as cpal::Sample>::from_sample(s)));
                let frame_count = converted.len() / channels;
                if on_data(&converted, frame_count) == CallbackAction::Stop {
                    stopped = true;
                }
            },
            move |err| {
                on_error(AudioError::StreamFailure {
                    reason: err.to_string(),
                });
            },
            None,
        )
        .map_err(map_build_error)
}

/// Hosts only report a refused microphone through the backend's own text
fn is_permission_denial(err: &cpal::BackendSpecificError) -> bool {
    let description = err.description.to_ascii_lowercase();
    ["permission", "denied", "eacces", "not authorized"]
        .iter()
        .any(|needle| description.contains(needle))
}

fn map_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::StreamConfigNotSupported => AudioError::UnsupportedFormat {
            reason: "stream configuration not supported".to_string(),
        },
        cpal::BuildStreamError::BackendSpecific { err } if is_permission_denial(&err) => {
            AudioError::PermissionDenied
        }
        other => AudioError::DeviceOpenFailed {
            reason: other.to_string(),
        },
    }
}

fn map_query_error(err: cpal::SupportedStreamConfigsError) -> AudioError {
    use cpal::SupportedStreamConfigsError as QueryError;
    match err {
        QueryError::BackendSpecific { err } if is_permission_denial(&err) => {
            AudioError::PermissionDenied
        }
        other => AudioError::DeviceOpenFailed {
            reason: format!("Failed to query input configs: {}", other),
        },
    }
}

fn map_play_error(err: cpal::PlayStreamError) -> AudioError {
    match err {
        cpal::PlayStreamError::BackendSpecific { err } if is_permission_denial(&err) => {
            AudioError::PermissionDenied
        }
        other => AudioError::DeviceStartFailed {
            reason: other.to_string(),
        },
    }
}

//! Configuration management for the detection pipeline
//!
//! This module provides runtime configuration loading from JSON files so
//! capture format, model selection and diagnostic throttling can be tuned
//! without recompilation. Every section falls back to defaults, so a
//! partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default location of the configuration file for desktop runs
pub const DEFAULT_CONFIG_PATH: &str = "assets/cough_config.json";

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub events: EventConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Capture format and buffering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Channels requested from the device (only the first is analyzed)
    pub channel_count: u16,
    /// Number of pre-allocated window buffers shared by capture and analysis
    pub buffer_pool_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channel_count: 1,
            buffer_pool_size: 8,
        }
    }
}

impl AudioConfig {
    /// Frames per 100 ms window at the configured sample rate
    pub fn frames_per_window(&self) -> usize {
        (self.sample_rate / 10) as usize
    }
}

/// Model runtime selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Resource handed to the model runtime; `None` selects the rule-based classifier
    pub resource_path: Option<String>,
    /// Input length used when a runtime cannot report its own
    pub input_length: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            resource_path: None,
            input_length: 16_000,
        }
    }
}

/// Event delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Broadcast channel capacity; slower consumers lag past this
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Throttling for periodic diagnostic log lines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Seconds between capture statistics lines
    pub stats_interval_secs: u64,
    /// Normalized level above which a window is reported as possibly clipped
    pub clipping_level: f32,
    /// Log once per this many silent windows
    pub silence_log_every: u64,
    /// Log once per this many non-cough classifications
    pub non_cough_log_every: u64,
    /// Analysis thread sleep when no window is pending
    pub worker_idle_sleep_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 10,
            clipping_level: 0.95,
            silence_log_every: 100,
            non_cough_log_every: 50,
            worker_idle_sleep_ms: 2,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default desktop location
    pub fn load() -> Self {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }
}

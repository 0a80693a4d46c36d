use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cough_detect::analysis::{FeatureExtractor, FeatureVector, RuleBasedClassifier};
use cough_detect::audio::{frames_per_window, Pacing};
use cough_detect::{
    init_logging, AppConfig, ClassificationResult, DetectionEngine, DetectionEvent, Signal,
    StatsSnapshot, SyntheticBackend,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "cough-cli", about = "Cough detection from a microphone or WAV files")]
struct Cli {
    /// JSON configuration file (defaults to assets/cough_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Model resource handed to the model runtime
    #[arg(long, global = true)]
    model: Option<String>,
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect coughs on the default input device, printing events as JSON lines
    Listen {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Also print level updates
        #[arg(long)]
        levels: bool,
    },
    /// Play a WAV file through the engine and print detections as JSON lines
    Analyze {
        wav: PathBuf,
        /// Deliver windows at the file's real-time rate
        #[arg(long)]
        realtime: bool,
    },
    /// Print per-window features and the rule-based decision for a WAV file
    Features { wav: PathBuf },
    /// Print the effective configuration
    Config,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_level.into());

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    if let Some(model) = cli.model {
        config.model.resource_path = Some(model);
    }

    match cli.command {
        Commands::Listen { seconds, levels } => run_listen(config, seconds, levels),
        Commands::Analyze { wav, realtime } => run_analyze(config, &wav, realtime),
        Commands::Features { wav } => run_features(&wav),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_listen(config: AppConfig, seconds: u64, levels: bool) -> Result<ExitCode> {
    let engine = DetectionEngine::with_default_device(config);
    engine
        .try_initialize(None)
        .context("failed to open the input device")?;

    engine.set_event_callback(move |event| {
        if levels || !matches!(event, DetectionEvent::LevelChanged { .. }) {
            print_json_line(&event);
        }
    });
    engine.try_start().context("failed to start recording")?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline && engine.is_recording() {
        thread::sleep(Duration::from_millis(100));
    }
    engine.stop();
    engine.clear_event_callback();

    let stats = engine.stats();
    print_summary(&stats);
    if let Some(message) = engine.last_error() {
        eprintln!("Capture ended early: {message}");
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_analyze(config: AppConfig, wav: &Path, realtime: bool) -> Result<ExitCode> {
    let pacing = if realtime {
        Pacing::RealTime
    } else {
        Pacing::Interval(Duration::from_millis(ANALYZE_INTERVAL_MS))
    };

    let stats = analyze_wav(config, wav, pacing, |event| print_json_line(&event))?;
    print_summary(&stats);
    if stats.windows_superseded > 0 || stats.windows_dropped > 0 {
        eprintln!(
            "Warning: {} window(s) were not analyzed; rerun with --realtime",
            stats.windows_superseded + stats.windows_dropped
        );
    }

    Ok(if stats.coughs_detected > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(3)
    })
}

/// Gap between windows when `analyze` runs faster than real time
const ANALYZE_INTERVAL_MS: u64 = 5;

/// Play `wav` through the engine and hand every cough event to `on_cough`
///
/// Events are consumed while playback runs, so files of any length report
/// all of their detections.
fn analyze_wav<F>(
    mut config: AppConfig,
    wav: &Path,
    pacing: Pacing,
    mut on_cough: F,
) -> Result<StatsSnapshot>
where
    F: FnMut(DetectionEvent) + Send + 'static,
{
    let (signal, sample_rate) = Signal::from_wav(wav)
        .with_context(|| format!("failed to read {}", wav.display()))?;
    config.audio.sample_rate = sample_rate;

    let backend = SyntheticBackend::new(signal).with_pacing(pacing);
    let progress = backend.progress();

    let engine = DetectionEngine::new(config, Arc::new(backend));
    engine
        .try_initialize(None)
        .context("failed to initialize the engine")?;

    let delivered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&delivered);
    engine.set_event_callback(move |event| {
        if event.is_cough() {
            on_cough(event);
            counter.fetch_add(1, Ordering::Release);
        }
    });
    engine.try_start().context("failed to start playback")?;

    while !progress.is_finished() {
        thread::sleep(Duration::from_millis(10));
    }

    // Wait for the analysis thread to settle on the final window
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && !all_windows_accounted(&engine.stats()) {
        thread::sleep(Duration::from_millis(5));
    }
    engine.stop();

    let stats = engine.stats();
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && delivered.load(Ordering::Acquire) < stats.coughs_detected
    {
        thread::sleep(Duration::from_millis(5));
    }
    engine.clear_event_callback();
    Ok(stats)
}

fn all_windows_accounted(stats: &StatsSnapshot) -> bool {
    stats.windows_processed + stats.windows_superseded + stats.windows_dropped
        >= stats.windows_captured
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WindowReport {
    index: usize,
    start_ms: u64,
    features: FeatureVector,
    result: ClassificationResult,
}

fn run_features(wav: &Path) -> Result<ExitCode> {
    let (signal, sample_rate) = Signal::from_wav(wav)
        .with_context(|| format!("failed to read {}", wav.display()))?;
    let Signal::Samples { samples, .. } = signal else {
        bail!("{} did not decode to samples", wav.display());
    };

    let window = frames_per_window(sample_rate);
    if window == 0 {
        bail!("sample rate {sample_rate} is too low for 100 ms windows");
    }
    let extractor = FeatureExtractor::new(sample_rate);
    let rules = RuleBasedClassifier::new();

    // Trailing partial windows are never emitted by the engine either
    for (index, chunk) in samples.chunks_exact(window).enumerate() {
        let features = extractor.extract(chunk);
        let result = rules.classify(&features);
        print_json_line(&WindowReport {
            index,
            start_ms: (index * window) as u64 * 1000 / sample_rate as u64,
            features,
            result,
        });
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => eprintln!("Failed to serialize output: {err}"),
    }
}

fn print_summary(stats: &StatsSnapshot) {
    eprintln!(
        "windows: {} captured, {} processed, {} dropped, {} superseded; coughs: {}; model fallbacks: {}; errors: {}",
        stats.windows_captured,
        stats.windows_processed,
        stats.windows_dropped,
        stats.windows_superseded,
        stats.coughs_detected,
        stats.model_fallbacks,
        stats.processing_errors
    );
}

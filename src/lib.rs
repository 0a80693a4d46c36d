// Cough Detect Core - real-time cough detection engine
// Microphone capture, lock-free window handoff, feature extraction and
// classification, with results delivered as events.

// Module declarations
pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{ClassificationResult, ClassifierKind, FeatureVector, ModelHandle, ModelRuntime};
pub use audio::{CaptureBackend, CpalBackend, Signal, SyntheticBackend};
pub use config::AppConfig;
pub use engine::{DetectionEngine, DetectionEvent, EngineState};
pub use error::{AudioError, ClassifierError, ErrorCode};
pub use telemetry::StatsSnapshot;

use tracing::Level;

/// Install a stderr `tracing` subscriber at `level`
///
/// `log` records from the crate are forwarded through the subscriber's log
/// bridge. Calling this more than once is harmless; only the first call
/// installs anything.
pub fn init_logging(level: Level) {
    if tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
    {
        log::debug!("[cough_detect] Logging initialized at {}", level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(Level::DEBUG);
        init_logging(Level::INFO);
    }

    #[test]
    fn test_default_engine_is_uninitialized() {
        let engine = DetectionEngine::new(
            AppConfig::default(),
            std::sync::Arc::new(SyntheticBackend::new(Signal::Silence)),
        );
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }
}

// AnalysisWorker - consumes captured windows off the real-time path
//
// The capture callback only copies each finished window into a pooled buffer
// (PipelineSink). This thread drains the data queue, keeps the newest window
// (latest wins), and runs feature extraction and classification on it while
// the engine state is held at Processing. Faults in one window are converted
// to an Error event; the loop itself never dies on a bad window.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer_pool::{
    AnalysisThreadChannels, CaptureThreadChannels, CapturedWindow, Handoff,
};
use crate::audio::capture::WindowSink;
use crate::audio::level::{AudioLevel, SILENCE_LEVEL};
use crate::config::DiagnosticsConfig;
use crate::engine::events::{DetectionEvent, EventBus};
use crate::engine::state::SharedState;
use crate::error::{log_audio_error, AudioError, ErrorCode};
use crate::telemetry::{epoch_millis, SessionStats};

use super::classifier::{ClassificationResult, Classifier};
use super::features::{FeatureExtractor, FeatureVector};

/// Capture-side sink that hands windows to the analysis thread
pub struct PipelineSink {
    channels: CaptureThreadChannels,
    stats: Arc<SessionStats>,
}

impl PipelineSink {
    pub fn new(channels: CaptureThreadChannels, stats: Arc<SessionStats>) -> Self {
        Self { channels, stats }
    }
}

impl WindowSink for PipelineSink {
    fn on_window(&mut self, frames: &[f32], sample_rate: u32, sequence: u64, level: f32) {
        match self.channels.publish(frames, sample_rate, sequence, level) {
            Handoff::Delivered => {}
            Handoff::PoolExhausted | Handoff::QueueFull => self.stats.record_dropped(),
        }
    }
}

/// Shared session pieces the worker reports into
#[derive(Clone)]
pub struct WorkerContext {
    pub state: SharedState,
    pub events: EventBus,
    pub stats: Arc<SessionStats>,
    pub level: AudioLevel,
    pub diagnostics: DiagnosticsConfig,
}

/// What happened to one window handed to [`AnalysisWorker::handle_window`]
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// Engine was not recording; the window was discarded
    Skipped,
    Classified(ClassificationResult),
    Failed(String),
}

pub struct AnalysisWorker {
    channels: AnalysisThreadChannels,
    extractor: FeatureExtractor,
    classifier: Classifier,
    ctx: WorkerContext,
    running: Arc<AtomicBool>,
    last_stats_log: Instant,
    captured_at_last_log: u64,
}

impl AnalysisWorker {
    pub fn new(
        channels: AnalysisThreadChannels,
        sample_rate: u32,
        classifier: Classifier,
        ctx: WorkerContext,
    ) -> Self {
        Self {
            channels,
            extractor: FeatureExtractor::new(sample_rate),
            classifier,
            ctx,
            running: Arc::new(AtomicBool::new(true)),
            last_stats_log: Instant::now(),
            captured_at_last_log: 0,
        }
    }

    /// Take the newest pending window, if any, and handle it
    ///
    /// # Returns
    /// The outcome, or `None` when nothing was queued
    pub fn process_pending(&mut self) -> Option<WindowOutcome> {
        let (latest, superseded) = self.channels.take_latest();
        if superseded > 0 {
            self.ctx.stats.record_superseded(superseded);
            tracing::debug!(
                "[AnalysisThread] {} window(s) superseded by a newer one",
                superseded
            );
        }

        let captured = latest?;
        let outcome = self.handle_window(&captured);
        self.channels.recycle(captured.window);
        Some(outcome)
    }

    /// Run one window through the pipeline and publish its events
    pub fn handle_window(&mut self, captured: &CapturedWindow) -> WindowOutcome {
        if !self.ctx.state.is_recording() {
            return WindowOutcome::Skipped;
        }

        self.note_level(captured.level);
        self.ctx.events.publish(DetectionEvent::LevelChanged {
            level: captured.level,
            timestamp: epoch_millis(),
        });

        if !self.ctx.state.begin_processing() {
            // Paused or stopped between the check and now
            return WindowOutcome::Skipped;
        }

        let samples = captured.window.samples();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.analyze(samples)));
        self.ctx.state.end_processing();

        let analyzed = match outcome {
            Ok(result) => result,
            Err(payload) => Err(AudioError::ProcessingFailed {
                reason: panic_message(payload.as_ref()),
            }),
        };

        match analyzed {
            Ok((features, result)) => {
                self.report(captured, &features, &result);
                WindowOutcome::Classified(result)
            }
            Err(err) => {
                log_audio_error(&err, "AnalysisWorker::handle_window");
                self.ctx.stats.record_processing_error();
                let message = err.message();
                self.ctx.events.publish(DetectionEvent::Error {
                    message: message.clone(),
                    timestamp: epoch_millis(),
                });
                WindowOutcome::Failed(message)
            }
        }
    }

    fn analyze(
        &mut self,
        samples: &[f32],
    ) -> Result<(FeatureVector, ClassificationResult), AudioError> {
        let features = self.extractor.extract(samples);
        if !features.is_finite() {
            return Err(AudioError::ProcessingFailed {
                reason: format!("non-finite features {:?}", features),
            });
        }

        let result = self.classifier.classify(samples, &features);
        if !result.confidence.is_finite() {
            return Err(AudioError::ProcessingFailed {
                reason: "classifier returned a non-finite confidence".to_string(),
            });
        }

        Ok((features, result))
    }

    fn report(
        &self,
        captured: &CapturedWindow,
        features: &FeatureVector,
        result: &ClassificationResult,
    ) {
        let stats = &self.ctx.stats;
        stats.record_processed(result.confidence);

        if result.is_cough {
            let timestamp = epoch_millis();
            let total = stats.record_cough(timestamp);
            tracing::info!(
                "[AnalysisThread] Cough detected (confidence {:.3}, amplitude {:.4}, window #{}, total {})",
                result.confidence,
                features.amplitude,
                captured.window.sequence(),
                total
            );
            self.ctx.events.publish(DetectionEvent::CoughDetected {
                confidence: result.confidence,
                amplitude: features.amplitude,
                audio_samples: captured.window.samples().to_vec(),
                timestamp,
                class_probabilities: result.class_probabilities.clone(),
            });
        } else {
            let count = stats.record_non_cough();
            if is_nth(count, self.ctx.diagnostics.non_cough_log_every) {
                tracing::debug!(
                    "[AnalysisThread] {} non-cough windows so far (last confidence {:.3}, centroid {:.0} Hz, zcr {:.3})",
                    count,
                    result.confidence,
                    features.spectral_centroid_hz,
                    features.zero_crossing_rate
                );
            }
        }
    }

    fn note_level(&self, level: f32) {
        let stats = &self.ctx.stats;
        if level < SILENCE_LEVEL {
            let count = stats.record_silent();
            if is_nth(count, self.ctx.diagnostics.silence_log_every) {
                tracing::debug!("[AnalysisThread] {} silent windows so far", count);
            }
        }
        if level > self.ctx.diagnostics.clipping_level {
            let count = stats.record_clipped();
            tracing::warn!(
                "[AnalysisThread] Input level {:.3} suggests clipping ({} window(s))",
                level,
                count
            );
        }
    }

    fn maybe_log_stats(&mut self) {
        let interval = Duration::from_secs(self.ctx.diagnostics.stats_interval_secs.max(1));
        let elapsed = self.last_stats_log.elapsed();
        if elapsed < interval {
            return;
        }

        let captured = self.ctx.stats.windows_captured();
        let fresh = captured - self.captured_at_last_log.min(captured);
        let rate = fresh as f32 / elapsed.as_secs_f32();
        tracing::info!(
            "[AnalysisThread] Capture stats: {} windows, level {:.3}, {:.1} windows/s",
            captured,
            self.ctx.level.get(),
            rate
        );
        self.last_stats_log = Instant::now();
        self.captured_at_last_log = captured;
    }

    fn run(mut self) {
        tracing::info!(
            "[AnalysisThread] Starting analysis loop ({:?} classifier)",
            self.classifier.kind()
        );
        let idle = Duration::from_millis(self.ctx.diagnostics.worker_idle_sleep_ms.max(1));

        while self.running.load(Ordering::Acquire) {
            if self.process_pending().is_none() {
                thread::sleep(idle);
            }
            self.maybe_log_stats();
        }

        // Return whatever is still queued so the pool is whole on exit
        if let (Some(captured), _) = self.channels.take_latest() {
            self.channels.recycle(captured.window);
        }
        tracing::info!("[AnalysisThread] Shutdown flag cleared, exiting");
    }
}

/// Handle to the running analysis thread
pub struct AnalysisThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AnalysisThread {
    /// Signal the loop to exit and wait for it
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("[AnalysisThread] Thread panicked during shutdown");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for AnalysisThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn spawn_analysis_thread(worker: AnalysisWorker) -> Result<AnalysisThread, AudioError> {
    let running = Arc::clone(&worker.running);
    let handle = thread::Builder::new()
        .name("cough-analysis".to_string())
        .spawn(move || worker.run())
        .map_err(|e| AudioError::WorkerSpawnFailed {
            reason: e.to_string(),
        })?;

    Ok(AnalysisThread {
        running,
        handle: Some(handle),
    })
}

fn is_nth(count: u64, every: u64) -> bool {
    every > 0 && count % every == 0
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic while analyzing window: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic while analyzing window: {}", message)
    } else {
        "panic while analyzing window".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::{ModelClassifier, RuleBasedClassifier};
    use crate::analysis::model::ModelHandle;
    use crate::audio::buffer_pool::BufferPool;
    use crate::engine::state::EngineState;
    use crate::error::ClassifierError;
    use tokio::sync::broadcast;

    struct PanickingHandle;

    impl ModelHandle for PanickingHandle {
        fn input_len(&self) -> Option<usize> {
            Some(16)
        }

        fn output_len(&self) -> Option<usize> {
            Some(2)
        }

        fn infer(&mut self, _input: &[f32]) -> Result<Vec<f32>, ClassifierError> {
            panic!("tensor arena corrupted");
        }
    }

    struct Harness {
        worker: AnalysisWorker,
        sink: PipelineSink,
        state: SharedState,
        stats: Arc<SessionStats>,
        events: broadcast::Receiver<DetectionEvent>,
    }

    fn harness(classifier: Classifier) -> Harness {
        let stats = Arc::new(SessionStats::new());
        let state = SharedState::new(EngineState::Recording);
        let bus = EventBus::new(64);
        let events = bus.subscribe();
        let (capture, analysis) = BufferPool::new(4, 1_600).split_for_threads();

        let ctx = WorkerContext {
            state: state.clone(),
            events: bus,
            stats: Arc::clone(&stats),
            level: AudioLevel::new(),
            diagnostics: DiagnosticsConfig::default(),
        };

        Harness {
            worker: AnalysisWorker::new(analysis, 16_000, classifier, ctx),
            sink: PipelineSink::new(capture, Arc::clone(&stats)),
            state,
            stats,
            events,
        }
    }

    fn tone(amplitude: f32) -> Vec<f32> {
        (0..1_600)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * 1_500.0 * i as f32 / 16_000.0).sin())
            .collect()
    }

    fn drain(rx: &mut broadcast::Receiver<DetectionEvent>) -> Vec<DetectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_cough_window_emits_level_then_detection() {
        let mut h = harness(Classifier::RuleBased(RuleBasedClassifier::new()));
        h.sink.on_window(&tone(0.15), 16_000, 0, 0.5);

        let outcome = h.worker.process_pending();
        assert!(matches!(outcome, Some(WindowOutcome::Classified(ref r)) if r.is_cough));

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DetectionEvent::LevelChanged { level, .. } if level == 0.5));
        match &events[1] {
            DetectionEvent::CoughDetected {
                confidence,
                audio_samples,
                amplitude,
                ..
            } => {
                assert_eq!(*confidence, 1.0);
                assert_eq!(audio_samples.len(), 1_600);
                assert!(*amplitude > 0.08);
            }
            other => panic!("expected CoughDetected, got {:?}", other),
        }
        assert_eq!(h.state.load(), EngineState::Recording);
        assert_eq!(h.stats.snapshot().coughs_detected, 1);
    }

    #[test]
    fn test_silent_window_emits_level_only() {
        let mut h = harness(Classifier::RuleBased(RuleBasedClassifier::new()));
        h.sink.on_window(&[0.0; 1_600], 16_000, 0, 0.0);

        assert!(matches!(
            h.worker.process_pending(),
            Some(WindowOutcome::Classified(ref r)) if !r.is_cough
        ));
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DetectionEvent::LevelChanged { .. }));
        assert_eq!(h.stats.snapshot().silent_windows, 1);
    }

    #[test]
    fn test_latest_window_wins() {
        let mut h = harness(Classifier::RuleBased(RuleBasedClassifier::new()));
        h.sink.on_window(&[0.0; 1_600], 16_000, 0, 0.1);
        h.sink.on_window(&[0.0; 1_600], 16_000, 1, 0.2);
        h.sink.on_window(&[0.0; 1_600], 16_000, 2, 0.3);

        assert!(h.worker.process_pending().is_some());
        assert!(h.worker.process_pending().is_none());

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DetectionEvent::LevelChanged { level, .. } if level == 0.3));
        assert_eq!(h.stats.snapshot().windows_superseded, 2);
    }

    #[test]
    fn test_full_pool_drops_windows() {
        let mut h = harness(Classifier::RuleBased(RuleBasedClassifier::new()));
        for sequence in 0..6 {
            h.sink.on_window(&[0.0; 1_600], 16_000, sequence, 0.0);
        }
        assert_eq!(h.stats.snapshot().windows_dropped, 2);

        // Buffers come back after processing
        assert!(h.worker.process_pending().is_some());
        h.sink.on_window(&[0.0; 1_600], 16_000, 6, 0.0);
        assert_eq!(h.stats.snapshot().windows_dropped, 2);
    }

    #[test]
    fn test_not_recording_skips_window() {
        let mut h = harness(Classifier::RuleBased(RuleBasedClassifier::new()));
        h.state.store(EngineState::Paused);
        h.sink.on_window(&tone(0.15), 16_000, 0, 0.5);

        assert_eq!(h.worker.process_pending(), Some(WindowOutcome::Skipped));
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.state.load(), EngineState::Paused);
    }

    #[test]
    fn test_non_finite_input_becomes_error_event() {
        let mut h = harness(Classifier::RuleBased(RuleBasedClassifier::new()));
        let mut samples = vec![0.1; 1_600];
        samples[10] = f32::NAN;
        h.sink.on_window(&samples, 16_000, 0, 0.4);

        assert!(matches!(
            h.worker.process_pending(),
            Some(WindowOutcome::Failed(_))
        ));
        let events = drain(&mut h.events);
        assert!(matches!(events.last(), Some(DetectionEvent::Error { .. })));
        assert_eq!(h.state.load(), EngineState::Recording);
        assert_eq!(h.stats.snapshot().processing_errors, 1);
    }

    #[test]
    fn test_panic_in_model_is_contained() {
        let stats = Arc::new(SessionStats::new());
        let model = ModelClassifier::new(Box::new(PanickingHandle), 16, stats);
        let mut h = harness(Classifier::Model(model));

        h.sink.on_window(&tone(0.15), 16_000, 0, 0.5);
        match h.worker.process_pending() {
            Some(WindowOutcome::Failed(message)) => {
                assert!(message.contains("tensor arena corrupted"), "{}", message)
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(h.state.load(), EngineState::Recording);

        // The next window is still processed
        h.sink.on_window(&[0.0; 1_600], 16_000, 1, 0.0);
        assert!(h.worker.process_pending().is_some());
    }

    #[test]
    fn test_spawned_thread_shuts_down() {
        let h = harness(Classifier::RuleBased(RuleBasedClassifier::new()));
        let mut thread = spawn_analysis_thread(h.worker).unwrap();
        assert!(thread.is_running());
        thread.shutdown();
        assert!(!thread.is_running());
    }
}

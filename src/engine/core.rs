//! DetectionEngine: lifecycle and wiring of the detection pipeline.
//!
//! One engine owns at most one session at a time. A session is the open
//! capture stream, the analysis thread with its classifier, and the counters
//! for that run; `initialize` builds it and `release` tears it down. All
//! methods take `&self`, so an engine can be shared behind an `Arc` between a
//! control thread and whatever reads its state.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::analysis::classifier::{Classifier, ClassifierKind};
use crate::analysis::model::{ModelRuntime, NoModelRuntime};
use crate::analysis::worker::{
    spawn_analysis_thread, AnalysisThread, AnalysisWorker, PipelineSink, WorkerContext,
};
use crate::audio::buffer_pool::BufferPool;
use crate::audio::capture::{CaptureSession, CaptureWiring};
use crate::audio::cpal_backend::CpalBackend;
use crate::audio::device::{CaptureBackend, ErrorCallback};
use crate::audio::level::AudioLevel;
use crate::config::AppConfig;
use crate::engine::events::{DetectionEvent, EventBus, EventDispatcher};
use crate::engine::state::{EngineState, SharedState};
use crate::error::{log_audio_error, AudioError, ErrorCode};
use crate::telemetry::{epoch_millis, SessionStats, StatsSnapshot};

#[path = "core_subscriptions.rs"]
mod core_subscriptions;

struct Session {
    capture: CaptureSession,
    worker: AnalysisThread,
    classifier_kind: ClassifierKind,
}

impl Session {
    fn teardown(&mut self) {
        // Capture first so no new windows arrive while the worker drains
        self.capture.release();
        self.worker.shutdown();
    }
}

/// Real-time cough detection engine
pub struct DetectionEngine {
    config: AppConfig,
    backend: Arc<dyn CaptureBackend>,
    model_runtime: Arc<dyn ModelRuntime>,
    state: SharedState,
    level: AudioLevel,
    events: EventBus,
    dispatcher: Mutex<EventDispatcher>,
    session: Mutex<Option<Session>>,
    stats: Mutex<Arc<SessionStats>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl DetectionEngine {
    /// Create an engine over `backend`; nothing is opened until `initialize`
    pub fn new(config: AppConfig, backend: Arc<dyn CaptureBackend>) -> Self {
        let events = EventBus::new(config.events.channel_capacity);
        Self {
            config,
            backend,
            model_runtime: Arc::new(NoModelRuntime),
            state: SharedState::new(EngineState::Uninitialized),
            level: AudioLevel::new(),
            events,
            dispatcher: Mutex::new(EventDispatcher::new()),
            session: Mutex::new(None),
            stats: Mutex::new(Arc::new(SessionStats::new())),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Engine on the default cpal input device
    pub fn with_default_device(config: AppConfig) -> Self {
        Self::new(config, Arc::new(CpalBackend::new()))
    }

    /// Use `runtime` to load model resources at `initialize`
    pub fn with_model_runtime(mut self, runtime: Arc<dyn ModelRuntime>) -> Self {
        self.model_runtime = runtime;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Open capture and select a classifier
    ///
    /// `resource_path` overrides `model.resource_path` from the config. An
    /// unavailable model is not a failure. Returns false (and records the
    /// error) when the capture device cannot be opened.
    pub fn initialize(&self, resource_path: Option<&str>) -> bool {
        self.report(self.try_initialize(resource_path), "DetectionEngine::initialize")
    }

    pub fn try_initialize(&self, resource_path: Option<&str>) -> Result<(), AudioError> {
        let mut guard = self.lock_session();
        if let Some(mut previous) = guard.take() {
            log::info!("[DetectionEngine] Re-initializing, releasing previous session");
            previous.teardown();
        }
        self.state.store(EngineState::Uninitialized);
        self.level.reset();

        let stats = Arc::new(SessionStats::new());
        *self.lock_stats() = Arc::clone(&stats);

        let audio = &self.config.audio;
        let (capture_channels, analysis_channels) =
            BufferPool::new(audio.buffer_pool_size.max(1), audio.frames_per_window().max(1))
                .split_for_threads();

        let capture = CaptureSession::initialize(
            self.backend.as_ref(),
            audio.sample_rate,
            audio.channel_count,
            CaptureWiring {
                sink: Box::new(PipelineSink::new(capture_channels, Arc::clone(&stats))),
                level: self.level.clone(),
                stats: Arc::clone(&stats),
                on_error: self.device_error_handler(),
            },
        )?;

        let resource = resource_path
            .map(str::to_string)
            .or_else(|| self.config.model.resource_path.clone());
        let classifier = Classifier::select(
            self.model_runtime.as_ref(),
            resource.as_deref(),
            self.config.model.input_length,
            Arc::clone(&stats),
        );
        let classifier_kind = classifier.kind();

        let worker = AnalysisWorker::new(
            analysis_channels,
            audio.sample_rate,
            classifier,
            WorkerContext {
                state: self.state.clone(),
                events: self.events.clone(),
                stats,
                level: self.level.clone(),
                diagnostics: self.config.diagnostics.clone(),
            },
        );
        // `capture` is released by its Drop if the thread cannot start
        let worker = spawn_analysis_thread(worker)?;

        *guard = Some(Session {
            capture,
            worker,
            classifier_kind,
        });
        self.state.store(EngineState::Idle);
        log::info!(
            "[DetectionEngine] Initialized at {} Hz with {:?} classifier",
            audio.sample_rate,
            classifier_kind
        );
        Ok(())
    }

    /// Begin (or continue) recording; false if not initialized or the device
    /// refuses to start
    pub fn start(&self) -> bool {
        self.report(self.try_start(), "DetectionEngine::start")
    }

    pub fn try_start(&self) -> Result<(), AudioError> {
        let mut guard = self.lock_session();
        let session = guard.as_mut().ok_or(AudioError::NotInitialized)?;

        match self.state.load() {
            EngineState::Recording | EngineState::Processing => return Ok(()),
            EngineState::Uninitialized => return Err(AudioError::NotInitialized),
            EngineState::Idle | EngineState::Paused => {}
        }

        session.capture.start()?;
        self.state.store(EngineState::Recording);
        log::info!("[DetectionEngine] Recording");
        Ok(())
    }

    /// Return to `Idle` and reset the level; no-op when idle or uninitialized
    pub fn stop(&self) {
        let mut guard = self.lock_session();
        self.level.reset();

        if matches!(
            self.state.load(),
            EngineState::Uninitialized | EngineState::Idle
        ) {
            return;
        }

        if let Some(session) = guard.as_mut() {
            if let Err(err) = session.capture.stop() {
                self.record_error(&err);
            }
        }
        self.state.store(EngineState::Idle);
        log::info!("[DetectionEngine] Stopped");
    }

    /// `Recording` to `Paused`; no-op otherwise
    pub fn pause(&self) {
        let mut guard = self.lock_session();
        let Some(session) = guard.as_mut() else {
            return;
        };
        if !self.state.is_recording() {
            return;
        }

        if let Err(err) = session.capture.pause() {
            log_audio_error(&err, "DetectionEngine::pause");
            self.record_error(&err);
            return;
        }
        if self
            .state
            .transition_from_any(
                &[EngineState::Recording, EngineState::Processing],
                EngineState::Paused,
            )
            .is_some()
        {
            log::info!("[DetectionEngine] Paused");
        }
    }

    /// `Paused` to `Recording`; no-op otherwise. False if the device
    /// refused to restart.
    pub fn resume(&self) -> bool {
        self.report(self.try_resume(), "DetectionEngine::resume")
    }

    pub fn try_resume(&self) -> Result<(), AudioError> {
        let mut guard = self.lock_session();
        let Some(session) = guard.as_mut() else {
            return Ok(());
        };
        if self.state.load() != EngineState::Paused {
            return Ok(());
        }

        session.capture.resume()?;
        self.state.store(EngineState::Recording);
        log::info!("[DetectionEngine] Resumed");
        Ok(())
    }

    /// Close the device, stop the analysis thread, return to `Uninitialized`
    pub fn release(&self) {
        let mut guard = self.lock_session();
        if let Some(mut session) = guard.take() {
            session.teardown();
            log::info!("[DetectionEngine] Released");
        }
        self.state.store(EngineState::Uninitialized);
        self.level.reset();
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Current state; the transient `Processing` reads as `Recording`
    pub fn state(&self) -> EngineState {
        self.state.load().external()
    }

    /// Current state including `Processing`
    pub fn raw_state(&self) -> EngineState {
        self.state.load()
    }

    /// Smoothed input level in [0, 1]
    pub fn audio_level(&self) -> f32 {
        self.level.get()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.audio.sample_rate
    }

    pub fn is_ready(&self) -> bool {
        self.state.load() != EngineState::Uninitialized
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    pub fn is_paused(&self) -> bool {
        self.state.load() == EngineState::Paused
    }

    pub fn is_processing(&self) -> bool {
        self.state.load() == EngineState::Processing
    }

    /// Strategy chosen by the current session, if any
    pub fn classifier_kind(&self) -> Option<ClassifierKind> {
        self.lock_session().as_ref().map(|s| s.classifier_kind)
    }

    /// Counters for the current (or most recent) session
    pub fn stats(&self) -> StatsSnapshot {
        self.lock_stats().snapshot()
    }

    /// Message of the most recent failure
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear_error(&self) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn device_error_handler(&self) -> ErrorCallback {
        let state = self.state.clone();
        let events = self.events.clone();
        let last_error = Arc::clone(&self.last_error);

        Box::new(move |err: AudioError| {
            log_audio_error(&err, "DetectionEngine::on_device_error");
            let message = err.message();
            *last_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(message.clone());

            events.publish(DetectionEvent::Error {
                message,
                timestamp: epoch_millis(),
            });

            if let Some(previous) = state.transition_from_any(
                &[
                    EngineState::Recording,
                    EngineState::Processing,
                    EngineState::Paused,
                ],
                EngineState::Idle,
            ) {
                log::warn!(
                    "[DetectionEngine] Capture failed while {}, now idle",
                    previous.external()
                );
            }
        })
    }

    fn report(&self, result: Result<(), AudioError>, context: &str) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                log_audio_error(&err, context);
                self.record_error(&err);
                false
            }
        }
    }

    fn record_error(&self, err: &AudioError) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(err.message());
    }

    // Control calls are serialized on this lock
    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| {
            log::warn!("[DetectionEngine] Session lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_stats(&self) -> MutexGuard<'_, Arc<SessionStats>> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests;

use super::*;
use crate::audio::synthetic::{Pacing, Signal, SyntheticBackend};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

fn silent_engine() -> DetectionEngine {
    let backend = SyntheticBackend::new(Signal::Silence)
        .with_pacing(Pacing::Interval(Duration::from_millis(1)));
    DetectionEngine::new(AppConfig::default(), Arc::new(backend))
}

#[test]
fn test_new_engine_is_uninitialized() {
    let engine = silent_engine();
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert!(!engine.is_ready());
    assert_eq!(engine.audio_level(), 0.0);
    assert_eq!(engine.sample_rate(), 16_000);
    assert_eq!(engine.classifier_kind(), None);
}

#[test]
fn test_start_requires_initialize() {
    let engine = silent_engine();
    assert!(!engine.start());
    assert!(matches!(engine.try_start(), Err(AudioError::NotInitialized)));
    assert!(engine.last_error().is_some());

    engine.clear_error();
    assert_eq!(engine.last_error(), None);
}

#[test]
fn test_controls_are_noops_before_initialize() {
    let engine = silent_engine();
    engine.stop();
    engine.pause();
    assert!(engine.resume());
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

#[test]
fn test_initialize_reaches_idle_with_rule_based_classifier() {
    let engine = silent_engine();
    assert!(engine.initialize(None));
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(engine.is_ready());
    assert_eq!(engine.classifier_kind(), Some(ClassifierKind::RuleBased));
}

#[test]
fn test_missing_model_is_not_an_initialize_failure() {
    let engine = silent_engine();
    assert!(engine.initialize(Some("assets/missing_model.tflite")));
    assert_eq!(engine.classifier_kind(), Some(ClassifierKind::RuleBased));
}

#[test]
fn test_idle_stop_and_pause_are_silent_noops() {
    let engine = silent_engine();
    assert!(engine.initialize(None));
    let mut rx = engine.subscribe();

    engine.stop();
    engine.pause();
    assert_eq!(engine.state(), EngineState::Idle);
    std::thread::sleep(Duration::from_millis(20));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_lifecycle_transitions() {
    let engine = silent_engine();
    assert!(engine.initialize(None));

    assert!(engine.start());
    assert_eq!(engine.state(), EngineState::Recording);
    assert!(engine.start(), "start while recording is idempotent");
    assert!(engine.is_recording());

    engine.pause();
    assert_eq!(engine.state(), EngineState::Paused);
    assert!(engine.is_paused());
    engine.pause();
    assert_eq!(engine.state(), EngineState::Paused);

    assert!(engine.resume());
    assert_eq!(engine.state(), EngineState::Recording);

    engine.stop();
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.audio_level(), 0.0);

    assert!(engine.start(), "idle engine can start again");
    engine.release();
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

#[test]
fn test_start_after_release_fails_until_reinitialized() {
    let engine = silent_engine();
    assert!(engine.initialize(None));
    engine.release();

    assert!(!engine.start());
    assert!(engine.initialize(None));
    assert!(engine.start());
}

#[test]
fn test_open_failure_keeps_uninitialized() {
    let backend = SyntheticBackend::new(Signal::Silence).failing_open("no microphone");
    let engine = DetectionEngine::new(AppConfig::default(), Arc::new(backend));

    assert!(!engine.initialize(None));
    assert!(matches!(
        engine.try_initialize(None),
        Err(AudioError::DeviceOpenFailed { .. })
    ));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert!(engine
        .last_error()
        .map(|m| m.contains("no microphone"))
        .unwrap_or(false));
}

#[test]
fn test_start_failure_stays_idle() {
    let backend = SyntheticBackend::new(Signal::Silence).failing_start("device busy");
    let engine = DetectionEngine::new(AppConfig::default(), Arc::new(backend));

    assert!(engine.initialize(None));
    assert!(!engine.start());
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn test_reinitialize_resets_stats() {
    let engine = silent_engine();
    assert!(engine.initialize(None));
    assert!(engine.start());
    std::thread::sleep(Duration::from_millis(50));
    assert!(engine.stats().windows_captured > 0);

    assert!(engine.initialize(None));
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.stats().windows_captured, 0);
}

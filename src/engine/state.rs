//! Engine lifecycle state, readable from any thread without blocking.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`DetectionEngine`](super::DetectionEngine)
///
/// `Processing` is transient: the analysis thread holds it only while one
/// window goes through feature extraction and classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Idle = 1,
    Recording = 2,
    Paused = 3,
    Processing = 4,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Idle,
            2 => EngineState::Recording,
            3 => EngineState::Paused,
            4 => EngineState::Processing,
            _ => EngineState::Uninitialized,
        }
    }

    /// The state as callers should see it
    pub fn external(self) -> Self {
        match self {
            EngineState::Processing => EngineState::Recording,
            other => other,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Idle => "idle",
            EngineState::Recording => "recording",
            EngineState::Paused => "paused",
            EngineState::Processing => "processing",
        };
        f.write_str(name)
    }
}

/// Atomic cell holding the current [`EngineState`], shared by the control
/// surface, the analysis thread and the device error callback
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<AtomicU8>,
}

impl SharedState {
    pub fn new(initial: EngineState) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(initial as u8)),
        }
    }

    /// Raw value, including the transient `Processing`
    pub fn load(&self) -> EngineState {
        EngineState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn store(&self, state: EngineState) {
        self.inner.store(state as u8, Ordering::Release);
    }

    /// Replace `from` with `to`; fails if another thread changed it first
    pub fn transition(&self, from: EngineState, to: EngineState) -> bool {
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `to` from any of `allowed`, returning the state that was left
    pub fn transition_from_any(
        &self,
        allowed: &[EngineState],
        to: EngineState,
    ) -> Option<EngineState> {
        let mut current = self.inner.load(Ordering::Acquire);
        loop {
            let state = EngineState::from_u8(current);
            if !allowed.contains(&state) {
                return None;
            }
            match self.inner.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(state),
                Err(actual) => current = actual,
            }
        }
    }

    /// Enter `Processing` for one window; only succeeds while `Recording`
    pub fn begin_processing(&self) -> bool {
        self.transition(EngineState::Recording, EngineState::Processing)
    }

    /// Leave `Processing`; a concurrent stop or pause is left untouched
    pub fn end_processing(&self) -> bool {
        self.transition(EngineState::Processing, EngineState::Recording)
    }

    /// `Recording` or `Processing`
    pub fn is_recording(&self) -> bool {
        matches!(
            self.load(),
            EngineState::Recording | EngineState::Processing
        )
    }
}

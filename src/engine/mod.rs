//! Engine module: lifecycle state machine and event delivery.
//!
//! `core` holds [`DetectionEngine`], the public control surface. `state` and
//! `events` are shared with the analysis thread.

pub mod core;
pub mod events;
pub mod state;

pub use core::DetectionEngine;
pub use events::{DetectionEvent, EventBus, EventDispatcher, EventHandler};
pub use state::{EngineState, SharedState};

use futures::Stream;
use tokio::sync::broadcast;

use super::DetectionEngine;
use crate::engine::events::{DetectionEvent, EventHandler};
use crate::error::{log_audio_error, AudioError};

impl DetectionEngine {
    // ========================================================================
    // EVENT SUBSCRIPTIONS
    // ========================================================================

    /// Register the consumer handler, replacing any previous one
    ///
    /// The handler runs on the engine's dispatcher thread, never on the
    /// capture or analysis thread. Events published before registration are
    /// not replayed.
    pub fn set_event_callback<F>(&self, handler: F)
    where
        F: FnMut(DetectionEvent) + Send + 'static,
    {
        self.install_handler(Some(Box::new(handler)));
    }

    /// Remove the handler; events keep flowing to other subscribers
    pub fn clear_event_callback(&self) {
        self.install_handler(None);
    }

    fn install_handler(&self, handler: Option<EventHandler>) {
        let result = match self.dispatcher.lock() {
            Ok(mut dispatcher) => dispatcher.set_handler(&self.events, handler),
            Err(_) => Err(AudioError::LockPoisoned {
                component: "event dispatcher".to_string(),
            }),
        };
        if let Err(err) = result {
            log_audio_error(&err, "DetectionEngine::set_event_callback");
            self.record_error(&err);
        }
    }

    /// Receiver for every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.events.subscribe()
    }

    /// Events as an async stream; gaps from lagging are skipped
    pub fn event_stream(&self) -> impl Stream<Item = DetectionEvent> + Send + 'static {
        self.events.stream()
    }
}

//! Detection events and their delivery to consumers.
//!
//! The analysis thread publishes into a `tokio::sync::broadcast` channel and
//! never calls consumer code directly. Consumers either hold a receiver,
//! poll a `futures::Stream`, or register a handler that runs on the
//! dispatcher thread owned by [`EventDispatcher`]. A consumer that falls
//! behind by more than the channel capacity loses the oldest events.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use futures::{future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::runtime::Builder;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::error::AudioError;

/// Event emitted by the detection pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DetectionEvent {
    /// Smoothed input level for the window just processed
    LevelChanged { level: f32, timestamp: u64 },

    CoughDetected {
        confidence: f32,
        /// Mean absolute amplitude of the window
        amplitude: f32,
        #[serde(rename = "audioSamples")]
        audio_samples: Vec<f32>,
        timestamp: u64,
        #[serde(
            rename = "classProbabilities",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        class_probabilities: Option<Vec<f32>>,
    },

    Error {
        #[serde(rename = "errorMessage")]
        message: String,
        timestamp: u64,
    },
}

impl DetectionEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            DetectionEvent::LevelChanged { timestamp, .. }
            | DetectionEvent::CoughDetected { timestamp, .. }
            | DetectionEvent::Error { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_cough(&self) -> bool {
        matches!(self, DetectionEvent::CoughDetected { .. })
    }
}

/// Consumer callback, run on the dispatcher thread
pub type EventHandler = Box<dyn FnMut(DetectionEvent) + Send>;

/// Fan-out channel for [`DetectionEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DetectionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish without blocking; events with no subscriber are discarded
    pub fn publish(&self, event: DetectionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.sender.subscribe()
    }

    /// Events as a stream; lagged gaps are logged and skipped
    pub fn stream(&self) -> impl Stream<Item = DetectionEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| {
            future::ready(match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    log::warn!("[DetectionEngine] Event stream lagged, {} events dropped", skipped);
                    None
                }
            })
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Handler slot shared with the dispatcher thread
///
/// `generation` changes on every install or removal. The dispatcher takes
/// the handler out while it runs, so the lock is never held across consumer
/// code, and puts it back only if nothing replaced it in the meantime.
#[derive(Default)]
struct HandlerSlot {
    handler: Option<EventHandler>,
    generation: u64,
}

/// Runs the registered handler on its own thread
///
/// The thread is started with the first handler and ends once every
/// [`EventBus`] clone is dropped. Replacing the handler does not restart it.
/// A handler may install or clear handlers from inside its own call.
#[derive(Default)]
pub struct EventDispatcher {
    slot: Arc<Mutex<HandlerSlot>>,
    started: bool,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install, replace or (with `None`) remove the handler
    pub fn set_handler(
        &mut self,
        bus: &EventBus,
        handler: Option<EventHandler>,
    ) -> Result<(), AudioError> {
        let install = handler.is_some();
        {
            let mut slot = self.slot.lock().map_err(|_| AudioError::LockPoisoned {
                component: "event handler".to_string(),
            })?;
            slot.handler = handler;
            slot.generation = slot.generation.wrapping_add(1);
        }

        if install && !self.started {
            self.spawn(bus.subscribe())?;
            self.started = true;
        }
        Ok(())
    }

    fn spawn(&self, mut receiver: broadcast::Receiver<DetectionEvent>) -> Result<(), AudioError> {
        let slot = Arc::clone(&self.slot);

        thread::Builder::new()
            .name("cough-event-dispatch".to_string())
            .spawn(move || {
                let rt = match Builder::new_current_thread().build() {
                    Ok(rt) => rt,
                    Err(err) => {
                        log::error!(
                            "[DetectionEngine] Failed to create dispatcher runtime: {}",
                            err
                        );
                        return;
                    }
                };

                rt.block_on(async move {
                    loop {
                        match receiver.recv().await {
                            Ok(event) => deliver(&slot, event),
                            Err(RecvError::Lagged(skipped)) => {
                                log::warn!(
                                    "[DetectionEngine] Event handler lagged, {} events dropped",
                                    skipped
                                );
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                });
                log::debug!("[DetectionEngine] Event dispatcher exiting");
            })
            .map(|_| ())
            .map_err(|e| AudioError::WorkerSpawnFailed {
                reason: format!("event dispatcher: {}", e),
            })
    }
}

fn deliver(slot: &Mutex<HandlerSlot>, event: DetectionEvent) {
    let (mut callback, generation) = {
        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.handler.take() {
            Some(callback) => (callback, guard.generation),
            None => return,
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
    if outcome.is_err() {
        log::error!("[DetectionEngine] Event handler panicked; event skipped");
    }

    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    // Installed or cleared while running: the newer choice stands
    if guard.generation == generation {
        guard.handler = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn level(value: f32) -> DetectionEvent {
        DetectionEvent::LevelChanged {
            level: value,
            timestamp: 1,
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = DetectionEvent::CoughDetected {
            confidence: 0.9,
            amplitude: 0.2,
            audio_samples: vec![0.0, 0.5],
            timestamp: 1_700_000_000_000,
            class_probabilities: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CoughDetected");
        assert_eq!(json["audioSamples"].as_array().map(Vec::len), Some(2));
        assert!(json.get("classProbabilities").is_none());

        let error = DetectionEvent::Error {
            message: "boom".to_string(),
            timestamp: 5,
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["errorMessage"], "boom");
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        bus.publish(level(0.1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_see_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(level(0.1));
        bus.publish(level(0.2));

        assert_eq!(rx.try_recv().unwrap(), level(0.1));
        assert_eq!(rx.try_recv().unwrap(), level(0.2));
    }

    #[test]
    fn test_slow_subscriber_lags() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(level(i as f32));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(3))
        ));
        assert_eq!(rx.try_recv().unwrap(), level(3.0));
    }

    #[test]
    fn test_stream_yields_events() {
        let bus = EventBus::new(8);
        let stream = bus.stream();
        bus.publish(level(0.4));

        let rt = Builder::new_current_thread().build().unwrap();
        let first = rt.block_on(async move {
            let mut stream = Box::pin(stream);
            stream.next().await
        });
        assert_eq!(first, Some(level(0.4)));
    }

    #[test]
    fn test_handler_runs_off_thread() {
        let bus = EventBus::new(8);
        let mut dispatcher = EventDispatcher::new();
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();

        dispatcher
            .set_handler(
                &bus,
                Some(Box::new(move |event| {
                    let _ = tx.send((event, thread::current().id()));
                })),
            )
            .unwrap();
        bus.publish(level(0.3));

        let (event, thread_id) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, level(0.3));
        assert_ne!(thread_id, caller);
    }

    #[test]
    fn test_handler_can_be_replaced() {
        let bus = EventBus::new(8);
        let mut dispatcher = EventDispatcher::new();
        let (first_tx, first_rx) = mpsc::channel();
        let (second_tx, second_rx) = mpsc::channel();

        dispatcher
            .set_handler(&bus, Some(Box::new(move |e| drop(first_tx.send(e)))))
            .unwrap();
        dispatcher
            .set_handler(&bus, Some(Box::new(move |e| drop(second_tx.send(e)))))
            .unwrap();
        bus.publish(level(0.7));

        assert_eq!(
            second_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            level(0.7)
        );
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn test_handler_can_replace_itself_while_running() {
        let bus = EventBus::new(8);
        let dispatcher = Arc::new(Mutex::new(EventDispatcher::new()));
        let (second_tx, second_rx) = mpsc::channel();

        let first_bus = bus.clone();
        let first_dispatcher = Arc::clone(&dispatcher);
        let mut second_tx = Some(second_tx);
        dispatcher
            .lock()
            .unwrap()
            .set_handler(
                &bus,
                Some(Box::new(move |_event| {
                    if let Some(tx) = second_tx.take() {
                        first_dispatcher
                            .lock()
                            .unwrap()
                            .set_handler(&first_bus, Some(Box::new(move |e| drop(tx.send(e)))))
                            .unwrap();
                    }
                })),
            )
            .unwrap();

        bus.publish(level(0.1));
        bus.publish(level(0.2));
        assert_eq!(
            second_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            level(0.2),
            "replacement installed from inside the handler receives later events"
        );

        // Another thread can still clear the handler
        let (done_tx, done_rx) = mpsc::channel();
        let clearing = Arc::clone(&dispatcher);
        let clear_bus = bus.clone();
        thread::spawn(move || {
            let result = clearing.lock().unwrap().set_handler(&clear_bus, None);
            let _ = done_tx.send(result.is_ok());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap());

        bus.publish(level(0.3));
        assert!(second_rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_handler_can_clear_itself() {
        let bus = EventBus::new(8);
        let dispatcher = Arc::new(Mutex::new(EventDispatcher::new()));
        let (tx, rx) = mpsc::channel();

        let inner_bus = bus.clone();
        let inner_dispatcher = Arc::clone(&dispatcher);
        dispatcher
            .lock()
            .unwrap()
            .set_handler(
                &bus,
                Some(Box::new(move |event| {
                    let _ = tx.send(event);
                    inner_dispatcher
                        .lock()
                        .unwrap()
                        .set_handler(&inner_bus, None)
                        .unwrap();
                })),
            )
            .unwrap();

        bus.publish(level(0.1));
        bus.publish(level(0.2));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), level(0.1));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}

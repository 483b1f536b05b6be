use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::event::{BackendEvent, QueuedEvent};

/// Consumer side of domain events. Implementations must not block the
/// caller and must deliver events in the order they were enqueued.
pub trait Broadcaster: Send + Sync {
    fn enqueue(&self, event: BackendEvent, payload: serde_json::Value);
}

/// Receiving end for one connected client. Unbounded, so a slow client
/// never loses events; it is dropped from the fan-out once closed.
pub type EventSubscription = mpsc::UnboundedReceiver<QueuedEvent>;

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<QueuedEvent>>>>;

/// In-process FIFO of outbound events.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<QueuedEvent>,
    subscribers: Subscribers,
}

/// The single consumer draining an `EventQueue`.
#[derive(Debug)]
pub struct EventDispatcher {
    rx: mpsc::UnboundedReceiver<QueuedEvent>,
    subscribers: Subscribers,
}

impl EventQueue {
    pub fn new() -> (Self, EventDispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribers = Subscribers::default();
        (
            Self {
                tx,
                subscribers: subscribers.clone(),
            },
            EventDispatcher { rx, subscribers },
        )
    }

    /// A subscription that sees every event delivered after this call.
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }
}

impl Broadcaster for EventQueue {
    fn enqueue(&self, event: BackendEvent, payload: serde_json::Value) {
        if self
            .tx
            .send(QueuedEvent {
                name: event,
                data: payload,
            })
            .is_err()
        {
            debug!(%event, "event dispatcher stopped, dropping event");
        }
    }
}

impl EventDispatcher {
    /// Forwards queued events to every open subscription until every
    /// `EventQueue` handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.fan_out(event);
        }
        debug!("event queue closed");
    }

    fn fan_out(&self, event: QueuedEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscribers.len();
        subscribers.retain(|client| client.send(event.clone()).is_ok());
        if subscribers.len() < before {
            debug!(
                dropped = before - subscribers.len(),
                "removed closed event subscriptions"
            );
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// One named event pushed to every connected listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub event: String,
    pub payload: Value,
}

/// Fan-out transport the reconciliation loops publish through.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: &str, payload: Value);
}

/// In-process broadcaster over a `tokio` broadcast channel. Slow receivers
/// lose the oldest messages.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: &str, payload: Value) {
        let message = BroadcastMessage {
            event: event.to_string(),
            payload,
        };
        if self.tx.send(message).is_err() {
            log::trace!("No listeners for {}", event);
        }
    }
}

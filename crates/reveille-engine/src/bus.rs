//! Domain event fan-out.

use tokio::sync::broadcast;
use tracing::debug;

use reveille_core::events::AlarmEvent;

/// Broadcast channel for `AlarmEvent`s. Publishing with no subscribers is fine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AlarmEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: AlarmEvent) {
        debug!(event = event.event_name(), item_id = %event.item_id(), "Publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<AlarmEvent> {
        self.tx.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

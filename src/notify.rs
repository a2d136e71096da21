use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events: one channel per spot plus a feed of everything,
/// which is what administrator dashboards follow (e.g. extension requests).
pub struct EventHub {
    spots: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            spots: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one spot's events. Creates the channel if needed.
    pub fn subscribe(&self, spot_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .spots
            .entry(spot_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// No-op for channels nobody is listening on. A spot channel whose last subscriber is
    /// gone is dropped here.
    pub fn publish(&self, event: &Event) {
        if let Some(spot_id) = event.spot_id() {
            let orphaned = self
                .spots
                .get(&spot_id)
                .is_some_and(|sender| sender.send(event.clone()).is_err());
            if orphaned {
                self.spots
                    .remove_if(&spot_id, |_, sender| sender.receiver_count() == 0);
            }
        }
        let _ = self.all.send(event.clone());
    }
}

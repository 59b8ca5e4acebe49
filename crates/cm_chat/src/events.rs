//! Invalidation bus.
//!
//! Both update paths (the periodic directory timer and push-driven activity
//! in an open conversation) publish here instead of mutating directory state
//! themselves. A single directory task consumes the bus and refetches, so
//! the two paths cannot race each other into divergent unread counts.

use tokio::sync::broadcast;

use cm_proto::RoomId;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// Something changed in this room (new message, read-all).
    Invalidate(RoomId),
    /// Refetch everything (timer tick, manual retry).
    RefreshAll,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DirectoryEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publishing with no subscriber is not an error; nobody needs a refresh.
    pub fn publish(&self, event: DirectoryEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!(target: "cm_chat", "directory event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let room: RoomId = "1-2".parse().unwrap();
        bus.publish(DirectoryEvent::Invalidate(room.clone()));
        bus.publish(DirectoryEvent::RefreshAll);
        assert_eq!(rx.recv().await.unwrap(), DirectoryEvent::Invalidate(room));
        assert_eq!(rx.recv().await.unwrap(), DirectoryEvent::RefreshAll);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        EventBus::new().publish(DirectoryEvent::RefreshAll);
    }
}

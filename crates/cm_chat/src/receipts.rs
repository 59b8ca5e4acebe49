//! Read receipts.
//!
//! Single acknowledgements are fire-and-forget: failures are logged and never
//! retried. Handed-off ids are remembered per room so repeats are skipped;
//! a room's ids are dropped on bulk acknowledgement and when its view closes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use cm_proto::{Message, MessageId, RoomId, UserId};

use crate::api::MessagingApi;
use crate::error::ChatError;
use crate::events::{DirectoryEvent, EventBus};

pub struct ReadReceiptTracker {
    api: Arc<dyn MessagingApi>,
    bus: EventBus,
    self_id: UserId,
    acked: Mutex<HashMap<RoomId, HashSet<MessageId>>>,
}

impl ReadReceiptTracker {
    pub fn new(api: Arc<dyn MessagingApi>, bus: EventBus, self_id: UserId) -> Self {
        Self {
            api,
            bus,
            self_id,
            acked: Mutex::new(HashMap::new()),
        }
    }

    /// Acknowledge one message in the background. Returns `None` when the id
    /// was already acknowledged in this room.
    pub fn mark_read(&self, room: &RoomId, id: MessageId) -> Option<JoinHandle<()>> {
        if !self.acked.lock().entry(room.clone()).or_default().insert(id.clone()) {
            return None;
        }
        let api = self.api.clone();
        Some(tokio::spawn(async move {
            match api.mark_read(&id).await {
                Ok(()) => tracing::debug!(target: "cm_chat", message_id = %id, "marked read"),
                Err(e) => {
                    tracing::warn!(target: "cm_chat", message_id = %id, error = %e, "mark read failed")
                }
            }
        }))
    }

    /// Acknowledge `message` only if someone else sent it.
    pub fn acknowledge_if_inbound(&self, message: &Message) -> Option<JoinHandle<()>> {
        if !message.is_inbound(self.self_id) || message.read {
            return None;
        }
        self.mark_read(&message.room_id, message.id.clone())
    }

    pub fn is_acknowledged(&self, room: &RoomId, id: &MessageId) -> bool {
        self.acked.lock().get(room).is_some_and(|ids| ids.contains(id))
    }

    /// Number of rooms with remembered ids.
    pub fn tracked_rooms(&self) -> usize {
        self.acked.lock().len()
    }

    pub fn forget_room(&self, room: &RoomId) {
        self.acked.lock().remove(room);
    }

    /// Bulk acknowledgement, then ask the directory to refetch this room.
    pub async fn mark_all_read(&self, room: &RoomId) -> Result<(), ChatError> {
        self.api.mark_all_read(room).await?;
        self.forget_room(room);
        tracing::info!(target: "cm_chat", event = "room_marked_read", room_id = %room);
        self.bus.publish(DirectoryEvent::Invalidate(room.clone()));
        Ok(())
    }
}

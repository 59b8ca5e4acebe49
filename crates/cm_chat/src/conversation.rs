//! An open one-to-one conversation.
//!
//! Opening a view loads history over REST, then joins the room's push
//! channel. Pushed frames are handled by one inbound task so messages land
//! in the store in arrival order. A push failure is only a warning; the view
//! keeps working over REST and `reload()`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use cm_crypto::EncryptionEngine;
use cm_proto::api::RecipientProfile;
use cm_proto::{room_id, Message, RoomId, ServerFrame, UserId};

use crate::api::MessagingApi;
use crate::config::SelfIdentity;
use crate::error::ChatError;
use crate::events::{DirectoryEvent, EventBus};
use crate::receipts::ReadReceiptTracker;
use crate::store::{FileUpload, MessageStore};
use crate::transport::{ChannelState, Connector, ReconnectPolicy, TransportChannel};

/// Shared services a view is built from.
#[derive(Clone)]
pub struct ViewDeps {
    pub api: Arc<dyn MessagingApi>,
    pub engine: EncryptionEngine,
    pub bus: EventBus,
    pub receipts: Arc<ReadReceiptTracker>,
    pub connector: Arc<dyn Connector>,
    pub identity: SelfIdentity,
    pub reconnect: ReconnectPolicy,
}

type PresenceMap = Arc<RwLock<HashMap<UserId, bool>>>;

pub struct ConversationView {
    room: RoomId,
    peer: UserId,
    identity: SelfIdentity,
    api: Arc<dyn MessagingApi>,
    store: Arc<MessageStore>,
    receipts: Arc<ReadReceiptTracker>,
    transport: TransportChannel,
    presence: PresenceMap,
    inbound: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationView {
    pub async fn open(peer: UserId, deps: ViewDeps) -> Result<Arc<Self>, ChatError> {
        if peer == deps.identity.user_id {
            return Err(ChatError::Validation("cannot open a conversation with yourself".into()));
        }
        let room = room_id(deps.identity.user_id, peer);
        let store = Arc::new(MessageStore::new(room.clone(), deps.api.clone(), deps.engine.clone()));
        store.load().await?;

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let transport = TransportChannel::new(deps.connector.clone(), deps.reconnect, frames_tx);
        let presence = PresenceMap::default();

        let inbound = tokio::spawn(run_inbound(
            Inbound {
                room: room.clone(),
                store: store.clone(),
                receipts: deps.receipts.clone(),
                bus: deps.bus.clone(),
                presence: presence.clone(),
            },
            frames_rx,
        ));

        let view = Arc::new(Self {
            room,
            peer,
            identity: deps.identity,
            api: deps.api,
            store,
            receipts: deps.receipts,
            transport,
            presence,
            inbound: Mutex::new(Some(inbound)),
        });

        if let Err(e) = view.join_push().await {
            tracing::warn!(
                target: "cm_chat",
                event = "push_unavailable",
                room_id = %view.room,
                error = %e,
                "live updates unavailable, falling back to REST"
            );
        }
        tracing::info!(target: "cm_chat", event = "conversation_opened", room_id = %view.room);
        Ok(view)
    }

    async fn join_push(&self) -> Result<(), ChatError> {
        self.transport.connect().await?;
        self.transport.join(&self.room, &self.identity).await
    }

    /// Shut the push channel down from whatever state it is in, stop the
    /// inbound task and drop this room's receipt bookkeeping.
    pub async fn close(&self) {
        if let Err(e) = self.transport.shutdown(&self.identity).await {
            tracing::warn!(target: "cm_chat", room_id = %self.room, error = %e, "leave_room not delivered");
        }
        if let Some(handle) = self.inbound.lock().take() {
            handle.abort();
        }
        self.receipts.forget_room(&self.room);
        tracing::info!(target: "cm_chat", event = "conversation_closed", room_id = %self.room);
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn peer(&self) -> UserId {
        self.peer
    }

    pub fn push_state(&self) -> ChannelState {
        self.transport.state()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.store.messages()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.store.subscribe()
    }

    pub async fn reload(&self) -> Result<usize, ChatError> {
        self.store.load().await
    }

    pub async fn send(&self, text: &str) -> Result<(), ChatError> {
        self.store.send(text).await
    }

    pub async fn send_file(&self, upload: FileUpload) -> Result<(), ChatError> {
        self.store.send_file(upload).await
    }

    pub async fn mark_all_read(&self) -> Result<(), ChatError> {
        self.receipts.mark_all_read(&self.room).await
    }

    pub async fn counterpart(&self) -> Result<RecipientProfile, ChatError> {
        self.api.recipient_profile(&self.room).await
    }

    /// Last presence pushed for the counterpart; offline until told otherwise.
    pub fn is_counterpart_online(&self) -> bool {
        self.presence.read().get(&self.peer).copied().unwrap_or(false)
    }
}

impl fmt::Debug for ConversationView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationView")
            .field("room", &self.room)
            .field("peer", &self.peer)
            .field("push_state", &self.transport.state())
            .field("messages", &self.store.len())
            .finish()
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        if let Some(handle) = self.inbound.lock().take() {
            handle.abort();
        }
    }
}

struct Inbound {
    room: RoomId,
    store: Arc<MessageStore>,
    receipts: Arc<ReadReceiptTracker>,
    bus: EventBus,
    presence: PresenceMap,
}

async fn run_inbound(ctx: Inbound, mut frames: mpsc::UnboundedReceiver<ServerFrame>) {
    while let Some(frame) = frames.recv().await {
        match frame {
            ServerFrame::ChatMessage(wire) => {
                if let Some(other) = wire.room_id.as_ref().filter(|r| **r != ctx.room) {
                    tracing::debug!(target: "cm_chat", room_id = %other, "ignoring message for another room");
                    continue;
                }
                let message = ctx.store.decrypt_wire(wire).await;
                ctx.receipts.acknowledge_if_inbound(&message);
                tracing::debug!(target: "cm_chat", room_id = %ctx.room, message_id = %message.id, "message pushed");
                ctx.store.append(message);
                ctx.bus.publish(DirectoryEvent::Invalidate(ctx.room.clone()));
            }
            ServerFrame::Presence(update) => {
                ctx.presence.write().insert(update.user_id, update.online);
            }
            ServerFrame::Unknown => {
                tracing::debug!(target: "cm_chat", room_id = %ctx.room, "ignoring unknown push frame");
            }
        }
    }
}

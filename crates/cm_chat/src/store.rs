//! Per-room ordered message cache.
//!
//! Fed by `load()` (full REST history) and by `append()` from the push
//! channel's inbound task. Sends never touch the cache: a sent message shows
//! up when the server pushes it back or on the next `load()`.

use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use cm_crypto::EncryptionEngine;
use cm_proto::api::SendMessageRequest;
use cm_proto::{Message, MessageType, RoomId, WireMessage};

use crate::api::{EncryptedUpload, MessagingApi};
use crate::error::ChatError;

pub const DECRYPT_PLACEHOLDER: &str = "[Unable to decrypt message]";

const UPDATE_CAPACITY: usize = 256;

/// A file picked for upload, before encryption.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Defaults to the file name when absent.
    pub caption: Option<String>,
}

impl FileUpload {
    pub fn message_type(&self) -> MessageType {
        match self.mime_type.as_deref() {
            Some(mime) if mime.starts_with("image/") => MessageType::Image,
            _ => MessageType::File,
        }
    }
}

pub struct MessageStore {
    room: RoomId,
    api: Arc<dyn MessagingApi>,
    engine: EncryptionEngine,
    messages: RwLock<Vec<Message>>,
    updates: broadcast::Sender<Message>,
}

impl MessageStore {
    pub fn new(room: RoomId, api: Arc<dyn MessagingApi>, engine: EncryptionEngine) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            room,
            api,
            engine,
            messages: RwLock::new(Vec::new()),
            updates,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Replace the cache with the server's history. On a fetch error the
    /// previous cache is left as it was.
    pub async fn load(&self) -> Result<usize, ChatError> {
        let history = self.api.room_history(&self.room).await?;
        let decrypted = join_all(history.into_iter().map(|wire| self.decrypt_wire(wire))).await;
        let count = decrypted.len();
        *self.messages.write() = decrypted;
        tracing::info!(target: "cm_chat", event = "history_loaded", room_id = %self.room, count);
        Ok(count)
    }

    /// Turn a wire message into a domain message. Undecryptable bodies are
    /// replaced with a placeholder so one bad envelope never hides the rest.
    pub async fn decrypt_wire(&self, wire: WireMessage) -> Message {
        if !wire.message_type.is_encrypted() {
            let text = wire.content.clone();
            return Message::from_wire(wire, &self.room, text);
        }
        let text = match self.engine.decrypt(&wire.content).await {
            Ok(text) => text,
            Err(source) => {
                let err = ChatError::Decryption { message_id: wire.id.to_string(), source };
                tracing::warn!(
                    target: "cm_chat",
                    room_id = %self.room,
                    message_id = %wire.id,
                    error = %err,
                    "showing placeholder for undecryptable message"
                );
                DECRYPT_PLACEHOLDER.to_string()
            }
        };
        Message::from_wire(wire, &self.room, text)
    }

    pub fn append(&self, message: Message) {
        self.messages.write().push(message.clone());
        // No receivers just means nothing is rendering right now.
        let _ = self.updates.send(message);
    }

    /// Snapshot in arrival order.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Messages appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.updates.subscribe()
    }

    pub async fn send(&self, plaintext: &str) -> Result<(), ChatError> {
        if plaintext.trim().is_empty() {
            return Err(ChatError::Validation("message body is empty".into()));
        }
        let content = self.engine.encrypt(plaintext).await?;
        let request = SendMessageRequest { content, message_type: MessageType::Text };
        self.api.send_message(&self.room, &request).await?;
        tracing::info!(target: "cm_chat", event = "message_sent", room_id = %self.room);
        Ok(())
    }

    /// Upload a file. Only the caption is encrypted.
    pub async fn send_file(&self, upload: FileUpload) -> Result<(), ChatError> {
        if upload.file_name.trim().is_empty() {
            return Err(ChatError::Validation("file name is empty".into()));
        }
        if upload.bytes.is_empty() {
            return Err(ChatError::Validation(format!("{} is empty", upload.file_name)));
        }
        let message_type = upload.message_type();
        let caption = upload
            .caption
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&upload.file_name);
        let content = self.engine.encrypt(caption).await?;
        let size = upload.bytes.len();

        self.api
            .upload_file(EncryptedUpload {
                room_id: self.room.clone(),
                message_type,
                file_name: upload.file_name,
                mime_type: upload.mime_type,
                bytes: upload.bytes,
                content,
            })
            .await?;
        tracing::info!(
            target: "cm_chat",
            event = "file_sent",
            room_id = %self.room,
            kind = message_type.as_str(),
            size,
        );
        Ok(())
    }
}

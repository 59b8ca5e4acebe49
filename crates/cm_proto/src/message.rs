//! Message model: the flat wire record and the decrypted domain message.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::room::{RoomId, UserId};

/// Server-assigned message id. The backend emits numbers; some paths echo
/// them back as strings, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawMessageId", into = "String")]
pub struct MessageId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMessageId {
    Number(i64),
    Text(String),
}

impl From<RawMessageId> for MessageId {
    fn from(raw: RawMessageId) -> Self {
        match raw {
            RawMessageId::Number(n) => Self(n.to_string()),
            RawMessageId::Text(s) => Self(s),
        }
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    /// System messages are written by the server in plaintext.
    pub fn is_encrypted(self) -> bool {
        !matches!(self, MessageType::System)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "system" => Ok(MessageType::System),
            other => Err(ProtoError::UnknownMessageType(other.to_string())),
        }
    }
}

/// Message as stored by the backend and pushed over the socket.
/// `content` is an envelope string unless `message_type` is `system`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: MessageId,
    /// Omitted on push frames, where the room is implied by the join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "messageType", alias = "type", default)]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, alias = "isRead")]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Decrypted caption; defaults to the file name on upload.
    pub caption: String,
    pub url: Option<String>,
    pub file_name: Option<String>,
}

/// Decrypted message body, one variant per message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { body: String },
    Image(Attachment),
    File(Attachment),
    System { body: String },
}

impl MessageContent {
    pub fn from_parts(
        kind: MessageType,
        text: String,
        url: Option<String>,
        file_name: Option<String>,
    ) -> Self {
        match kind {
            MessageType::Text => Self::Text { body: text },
            MessageType::Image => Self::Image(Attachment { caption: text, url, file_name }),
            MessageType::File => Self::File(Attachment { caption: text, url, file_name }),
            MessageType::System => Self::System { body: text },
        }
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Self::Text { .. } => MessageType::Text,
            Self::Image(_) => MessageType::Image,
            Self::File(_) => MessageType::File,
            Self::System { .. } => MessageType::System,
        }
    }

    /// Human readable text: body for text/system, caption for attachments.
    pub fn text(&self) -> &str {
        match self {
            Self::Text { body } | Self::System { body } => body,
            Self::Image(a) | Self::File(a) => &a.caption,
        }
    }
}

/// Message after decryption, as held by the message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    /// Build a domain message from its wire form and the already-decrypted
    /// text (or the untouched content for system messages).
    pub fn from_wire(wire: WireMessage, room: &RoomId, text: String) -> Self {
        Self {
            id: wire.id,
            room_id: wire.room_id.unwrap_or_else(|| room.clone()),
            sender_id: wire.sender_id,
            content: MessageContent::from_parts(wire.message_type, text, wire.file_url, wire.file_name),
            timestamp: wire.timestamp,
            read: wire.read,
        }
    }

    pub fn is_inbound(&self, me: UserId) -> bool {
        self.sender_id != me
    }
}

//! REST request/response bodies for the `/messaging` endpoints.
//! These map directly to JSON bodies on the wire (camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageType;
use crate::room::{RoomId, UserId};

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Envelope string.
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, alias = "isOnline")]
    pub online: bool,
}

impl UserSummary {
    /// Full name when the profile has one, username otherwise.
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientProfile {
    #[serde(flatten)]
    pub user: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

// ── Recent conversations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    /// Envelope string from the server; plaintext after the directory
    /// decrypts it.
    pub content: String,
    #[serde(rename = "messageType", alias = "type", default)]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreview {
    pub room_id: RoomId,
    #[serde(alias = "recipient", alias = "otherUser")]
    pub counterpart: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
}

// ── Common ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(alias = "message")]
    pub error: String,
}

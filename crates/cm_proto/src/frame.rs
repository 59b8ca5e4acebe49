//! Push socket frames. JSON text frames discriminated by `type`.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::message::WireMessage;
use crate::room::{RoomId, UserId};

/// Frames the client writes. `join_room` must be the first frame after connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinRoom(RoomMembership),
    LeaveRoom(RoomMembership),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembership {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
}

impl ClientFrame {
    pub fn to_text(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames the server pushes. Older servers spell the message frame
/// `message`, newer ones `chat_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "chat_message", alias = "message")]
    ChatMessage(WireMessage),
    #[serde(rename = "presence")]
    Presence(PresenceUpdate),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: UserId,
    #[serde(alias = "isOnline")]
    pub online: bool,
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn join_frame_shape() {
        let frame = ClientFrame::JoinRoom(RoomMembership {
            room_id: "5-12".parse().unwrap(),
            user_id: UserId::new(5).unwrap(),
            username: "ada".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "join_room");
        assert_eq!(value["roomId"], "5-12");
        assert_eq!(value["userId"], 5);
        assert_eq!(value["username"], "ada");
    }

    #[test]
    fn accepts_both_message_spellings() {
        for tag in ["chat_message", "message"] {
            let text = format!(
                r#"{{"type":"{tag}","id":1,"senderId":12,"content":"ct","timestamp":"2024-03-01T10:00:00Z","messageType":"text"}}"#
            );
            match ServerFrame::parse(&text).unwrap() {
                ServerFrame::ChatMessage(wire) => {
                    assert_eq!(wire.sender_id, UserId::new(12).unwrap());
                    assert_eq!(wire.message_type, MessageType::Text);
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    #[test]
    fn presence_and_unknown_frames() {
        let presence = ServerFrame::parse(r#"{"type":"presence","userId":4,"isOnline":true}"#).unwrap();
        assert!(matches!(presence, ServerFrame::Presence(PresenceUpdate { online: true, .. })));

        let typing = ServerFrame::parse(r#"{"type":"typing","userId":4}"#).unwrap();
        assert!(matches!(typing, ServerFrame::Unknown));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(ServerFrame::parse("not json").is_err());
    }

    #[test]
    fn invalid_ids_in_frames_are_rejected() {
        let zero_sender = r#"{"type":"chat_message","id":1,"senderId":0,"content":"ct","timestamp":"2024-03-01T10:00:00Z"}"#;
        assert!(ServerFrame::parse(zero_sender).is_err());

        let reversed_room = r#"{"type":"chat_message","id":1,"roomId":"7-3","senderId":3,"content":"ct","timestamp":"2024-03-01T10:00:00Z"}"#;
        assert!(ServerFrame::parse(reversed_room).is_err());
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
}

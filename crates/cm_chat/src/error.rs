use thiserror::Error;

use cm_crypto::CryptoError;

/// Every failure the messaging core reports. None of them are fatal to the
/// host: callers turn them into view state (warning, placeholder, retry).
#[derive(Debug, Error)]
pub enum ChatError {
    /// Push channel could not open or send. Delivery degrades to REST only.
    #[error("Push channel error: {0}")]
    Transport(String),

    /// One message could not be decrypted; rendered as a placeholder.
    #[error("Could not decrypt message {message_id}: {source}")]
    Decryption {
        message_id: String,
        #[source]
        source: CryptoError,
    },

    /// REST or network failure. The last good cache is kept.
    #[error("Request failed: {0}")]
    Fetch(String),

    /// Rejected locally before any network call.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Master secret storage or encryption failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Fetch(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}

impl From<cm_proto::ProtoError> for ChatError {
    fn from(e: cm_proto::ProtoError) -> Self {
        ChatError::Transport(e.to_string())
    }
}

impl ChatError {
    /// Whether the view should offer a retry affordance.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Fetch(_) | ChatError::Transport(_))
    }
}

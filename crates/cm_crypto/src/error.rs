use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch: wrong key or tampering)")]
    AeadDecrypt,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("Crypto worker failed: {0}")]
    Worker(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// True for failures that mean "this envelope cannot be opened here",
    /// as opposed to local key storage or runtime problems.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::AeadDecrypt
                | CryptoError::MalformedEnvelope(_)
                | CryptoError::InvalidUtf8
                | CryptoError::Base64Decode(_)
        )
    }
}

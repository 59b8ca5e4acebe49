//! cm_crypto: Campus Messenger end-to-end message body encryption
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - The master secret never leaves the device; only envelopes do.
//!
//! # Module layout
//! - `engine`   `EncryptionEngine`: lazy master secret, encrypt/decrypt
//! - `envelope` salt ‖ iv ‖ ciphertext+tag, base64 transport form
//! - `kdf`      PBKDF2-HMAC-SHA256 per-message keys
//! - `aead`     AES-256-GCM helpers
//! - `secret`   `MasterSecret` and the `SecretStore` backends
//! - `error`    unified error type

pub mod aead;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod secret;

pub use engine::EncryptionEngine;
pub use envelope::Envelope;
pub use error::CryptoError;
pub use kdf::KdfParams;
pub use secret::{FileSecretStore, KeyringSecretStore, MasterSecret, MemorySecretStore, SecretStore};

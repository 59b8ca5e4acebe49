//! Per-message key derivation.
//!
//! `message_key` PBKDF2-HMAC-SHA256 over the master secret and a fresh
//!   16-byte salt. Every message gets its own salt, so every message gets its
//!   own key.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::envelope::{IV_LEN, SALT_LEN};
use crate::error::CryptoError;

pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Key derivation parameters. Both sides of a conversation must agree, so
/// anything other than the default is only useful for local testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { iterations: DEFAULT_ITERATIONS }
    }
}

/// Derive the 32-byte AES key for one envelope.
pub fn message_key(
    master: &[u8; 32],
    salt: &[u8; SALT_LEN],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    if params.iterations == 0 {
        return Err(CryptoError::KeyDerivation("iteration count must be non-zero".into()));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(master, salt, params.iterations, key.as_mut());
    Ok(key)
}

/// Fresh random salt (one per message; not secret, travels in the envelope).
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM (96-bit nonce).
//! Key size: 32 bytes.  IV: 12 bytes (random, carried in the envelope).  Tag: 16 bytes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::envelope::IV_LEN;
use crate::error::CryptoError;

/// Encrypt `plaintext`; the returned bytes are ciphertext with the tag appended.
pub fn encrypt(key: &[u8; 32], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::AeadEncrypt)
}

/// Decrypt ciphertext+tag. Any tag mismatch is `AeadDecrypt`.
pub fn decrypt(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}

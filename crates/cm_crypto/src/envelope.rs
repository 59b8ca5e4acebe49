//! Ciphertext envelope for one message body.
//!
//! Wire format (before base64):
//!   [ salt (16 bytes) | iv (12 bytes) | ciphertext + tag (16 bytes) ]
//!
//! Encoded with standard base64 so it can travel inside JSON strings.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::CryptoError;

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const HEADER_LEN: usize = SALT_LEN + IV_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    /// AES-GCM output, tag appended.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < HEADER_LEN + TAG_LEN {
            return Err(CryptoError::MalformedEnvelope(format!(
                "{} bytes is shorter than salt + iv + tag",
                data.len()
            )));
        }
        let (salt, rest) = data.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);

        let mut envelope = Envelope {
            salt: [0u8; SALT_LEN],
            iv: [0u8; IV_LEN],
            ciphertext: ciphertext.to_vec(),
        };
        envelope.salt.copy_from_slice(salt);
        envelope.iv.copy_from_slice(iv);
        Ok(envelope)
    }

    /// Transport string carried in message `content` fields.
    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn decode(transport: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD.decode(transport.trim())?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_salt_iv_ciphertext() {
        let env = Envelope {
            salt: [1u8; SALT_LEN],
            iv: [2u8; IV_LEN],
            ciphertext: vec![3u8; TAG_LEN + 4],
        };
        let bytes = env.to_bytes();
        assert_eq!(bytes.len(), SALT_LEN + IV_LEN + TAG_LEN + 4);
        assert!(bytes[..SALT_LEN].iter().all(|b| *b == 1));
        assert!(bytes[SALT_LEN..SALT_LEN + IV_LEN].iter().all(|b| *b == 2));
        assert_eq!(Envelope::decode(&env.encode()).unwrap(), env);
    }

    #[test]
    fn rejects_short_and_non_base64_input() {
        assert!(matches!(
            Envelope::from_bytes(&[0u8; HEADER_LEN + TAG_LEN - 1]),
            Err(CryptoError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Envelope::decode("not base64 at all!"),
            Err(CryptoError::Base64Decode(_))
        ));
    }
}

//! Message body encryption engine.
//!
//! `encrypt` fresh salt + IV per call, PBKDF2 key from the master secret,
//!   AES-256-GCM, returns the base64 envelope string.
//! `decrypt` reverses it; any failure is a `CryptoError` the caller turns
//!   into a placeholder.
//!
//! The master secret is loaded (or generated and persisted) on first use.
//! First use is single-flight: concurrent callers wait for one initializer.

use std::sync::Arc;

use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use crate::aead;
use crate::envelope::Envelope;
use crate::error::CryptoError;
use crate::kdf::{self, KdfParams};
use crate::secret::{MasterSecret, SecretStore};

struct EngineInner {
    store: Arc<dyn SecretStore>,
    secret: OnceCell<Arc<MasterSecret>>,
    params: KdfParams,
}

/// Cheap to clone; clones share the master secret.
#[derive(Clone)]
pub struct EncryptionEngine {
    inner: Arc<EngineInner>,
}

impl EncryptionEngine {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self::with_params(store, KdfParams::default())
    }

    pub fn with_params(store: Arc<dyn SecretStore>, params: KdfParams) -> Self {
        Self {
            inner: Arc::new(EngineInner { store, secret: OnceCell::new(), params }),
        }
    }

    /// Return the persisted master secret, creating and persisting one if
    /// the store is empty.
    pub async fn master_secret(&self) -> Result<Arc<MasterSecret>, CryptoError> {
        let store = self.inner.store.as_ref();
        let secret = self
            .inner
            .secret
            .get_or_try_init(|| load_or_create(store))
            .await?;
        Ok(secret.clone())
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let secret = self.master_secret().await?;
        let params = self.inner.params;
        let plaintext = Zeroizing::new(plaintext.as_bytes().to_vec());
        let envelope = run_blocking(move || seal(&secret, params, &plaintext)).await?;
        Ok(envelope.encode())
    }

    pub async fn decrypt(&self, transport: &str) -> Result<String, CryptoError> {
        let envelope = Envelope::decode(transport)?;
        let secret = self.master_secret().await?;
        let params = self.inner.params;
        let plaintext = run_blocking(move || open(&secret, params, &envelope)).await?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::InvalidUtf8)
    }
}

async fn load_or_create(store: &dyn SecretStore) -> Result<Arc<MasterSecret>, CryptoError> {
    if let Some(existing) = store.load().await? {
        tracing::debug!(
            target: "cm_crypto",
            event = "master_secret_loaded",
            fingerprint = %existing.fingerprint()
        );
        return Ok(Arc::new(existing));
    }
    let fresh = MasterSecret::generate();
    store.save(&fresh).await?;
    tracing::info!(
        target: "cm_crypto",
        event = "master_secret_created",
        fingerprint = %fresh.fingerprint()
    );
    Ok(Arc::new(fresh))
}

/// Encrypt one message body under a freshly salted key.
pub fn seal(secret: &MasterSecret, params: KdfParams, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
    let salt = kdf::generate_salt();
    let iv = kdf::generate_iv();
    let key = kdf::message_key(secret.expose(), &salt, params)?;
    let ciphertext = aead::encrypt(&key, &iv, plaintext)?;
    Ok(Envelope { salt, iv, ciphertext })
}

pub fn open(
    secret: &MasterSecret,
    params: KdfParams,
    envelope: &Envelope,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = kdf::message_key(secret.expose(), &envelope.salt, params)?;
    aead::decrypt(&key, &envelope.iv, &envelope.ciphertext)
}

// PBKDF2 at 100k rounds is tens of milliseconds; keep it off the reactor.
async fn run_blocking<F, R>(f: F) -> Result<R, CryptoError>
where
    F: FnOnce() -> Result<R, CryptoError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CryptoError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::MemorySecretStore;

    const FAST: KdfParams = KdfParams { iterations: 1_000 };

    fn fast_engine() -> (EncryptionEngine, Arc<MemorySecretStore>) {
        let store = Arc::new(MemorySecretStore::new());
        (EncryptionEngine::with_params(store.clone(), FAST), store)
    }

    #[tokio::test]
    async fn hello_roundtrip_with_default_params() {
        let engine = EncryptionEngine::new(Arc::new(MemorySecretStore::new()));
        let envelope = engine.encrypt("Hello").await.unwrap();
        assert!(envelope.len() >= 40);
        assert_eq!(engine.decrypt(&envelope).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn roundtrip_up_to_four_kilobytes() {
        let (engine, _) = fast_engine();
        let alphabet: Vec<char> = "abcXYZ 019 !?.,;:-_ éü漢字🙂".chars().collect();
        for len in [0usize, 1, 17, 255, 1024, 4096] {
            let text: String = (0..len).map(|i| alphabet[i % alphabet.len()]).collect();
            let envelope = engine.encrypt(&text).await.unwrap();
            assert_eq!(engine.decrypt(&envelope).await.unwrap(), text);
        }
    }

    #[tokio::test]
    async fn same_plaintext_never_repeats() {
        let (engine, _) = fast_engine();
        let a = engine.encrypt("same").await.unwrap();
        let b = engine.encrypt("same").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn flipping_any_byte_fails_decryption() {
        let (engine, _) = fast_engine();
        let transport = engine.encrypt("tamper me").await.unwrap();
        let bytes = Envelope::decode(&transport).unwrap().to_bytes();
        for i in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            let tampered = Envelope::from_bytes(&tampered).unwrap().encode();
            let err = engine.decrypt(&tampered).await.unwrap_err();
            assert!(matches!(err, CryptoError::AeadDecrypt), "byte {i}: {err:?}");
        }
    }

    #[tokio::test]
    async fn other_client_cannot_decrypt() {
        let (alice, _) = fast_engine();
        let (bob, _) = fast_engine();
        let envelope = alice.encrypt("for my eyes only").await.unwrap();
        let err = bob.decrypt(&envelope).await.unwrap_err();
        assert!(err.is_decryption_failure());
    }

    #[tokio::test]
    async fn malformed_input_is_a_decryption_failure() {
        let (engine, _) = fast_engine();
        for bad in ["", "%%%", "AAAA"] {
            let err = engine.decrypt(bad).await.unwrap_err();
            assert!(err.is_decryption_failure(), "{bad:?}: {err:?}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_generates_once() {
        let (engine, store) = fast_engine();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move { engine.master_secret().await.unwrap() }));
        }
        let mut fingerprints = Vec::new();
        for handle in handles {
            fingerprints.push(handle.await.unwrap().fingerprint());
        }
        fingerprints.dedup();
        assert_eq!(fingerprints.len(), 1);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn existing_secret_is_reused() {
        let secret = MasterSecret::generate();
        let store = Arc::new(MemorySecretStore::with_secret(secret.clone()));
        let engine = EncryptionEngine::with_params(store.clone(), FAST);
        let loaded = engine.master_secret().await.unwrap();
        assert_eq!(loaded.expose(), secret.expose());
        assert_eq!(store.save_count(), 0);

        // A second engine over the same store reads the same key.
        let envelope = engine.encrypt("persisted").await.unwrap();
        let reopened = EncryptionEngine::with_params(store, FAST);
        assert_eq!(reopened.decrypt(&envelope).await.unwrap(), "persisted");
    }
}

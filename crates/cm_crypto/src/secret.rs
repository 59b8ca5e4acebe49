//! Master secret and its storage backends.
//!
//! The master secret is 32 random bytes created once per client and never
//! transmitted. Storage is a `SecretStore` injected into the engine:
//! - `FileSecretStore`    base64 file under the app data dir (0600 on unix)
//! - `KeyringSecretStore` OS credential store via `keyring`
//! - `MemorySecretStore`  process-local, for tests and ephemeral sessions

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// 256-bit master secret. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct MasterSecret([u8; 32]);

impl MasterSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short non-reversible id, safe to log: first 8 bytes of SHA-256, hex.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }

    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.0))
    }

    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(STANDARD.decode(encoded.trim())?);
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "master secret must be 32 bytes, found {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterSecret({})", self.fingerprint())
    }
}

/// Durable home of the master secret.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when no secret has been stored yet.
    async fn load(&self) -> Result<Option<MasterSecret>, CryptoError>;
    async fn save(&self, secret: &MasterSecret) -> Result<(), CryptoError>;
}

// ── File ─────────────────────────────────────────────────────────────────────

pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn load(&self) -> Result<Option<MasterSecret>, CryptoError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let contents = Zeroizing::new(contents);
                MasterSecret::decode(&contents).map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, secret: &MasterSecret) -> Result<(), CryptoError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write beside the target and rename so a crash never leaves half a key.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, secret.encode().as_bytes()).await?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), CryptoError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), CryptoError> {
    Ok(())
}

// ── OS keyring ───────────────────────────────────────────────────────────────

pub struct KeyringSecretStore {
    service: String,
    account: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self { service: service.into(), account: account.into() }
    }

    fn entry(&self) -> Result<keyring::Entry, CryptoError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| CryptoError::SecretStore(format!("keyring init: {e}")))
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn load(&self) -> Result<Option<MasterSecret>, CryptoError> {
        let entry = self.entry()?;
        let stored = tokio::task::spawn_blocking(move || entry.get_password())
            .await
            .map_err(|e| CryptoError::Worker(e.to_string()))?;
        match stored {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                MasterSecret::decode(&encoded).map(Some)
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CryptoError::SecretStore(format!("load master secret: {e}"))),
        }
    }

    async fn save(&self, secret: &MasterSecret) -> Result<(), CryptoError> {
        let entry = self.entry()?;
        let encoded = secret.encode();
        tokio::task::spawn_blocking(move || entry.set_password(&encoded))
            .await
            .map_err(|e| CryptoError::Worker(e.to_string()))?
            .map_err(|e| CryptoError::SecretStore(format!("store master secret: {e}")))
    }
}

// ── Memory ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemorySecretStore {
    slot: Mutex<Option<MasterSecret>>,
    saves: AtomicUsize,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: MasterSecret) -> Self {
        Self { slot: Mutex::new(Some(secret)), saves: AtomicUsize::new(0) }
    }

    /// How many times a secret has been written.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn load(&self) -> Result<Option<MasterSecret>, CryptoError> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, secret: &MasterSecret) -> Result<(), CryptoError> {
        *self.slot.lock() = Some(secret.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//! Client configuration.
//!
//! Read from the environment with defaults, the binary layers CLI flags on
//! top. Variables:
//!   CM_API_URL        REST base, e.g. https://school.example/api
//!   CM_SOCKET_URL     push socket endpoint (ws:// or wss://)
//!   CM_ACCESS_TOKEN   bearer token issued by the platform login
//!   CM_USER_ID        local user id (required)
//!   CM_USERNAME       local display username
//!   CM_SECRET_BACKEND file | keyring | memory
//!   CM_RECONNECT      never | backoff

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cm_crypto::{FileSecretStore, KeyringSecretStore, MemorySecretStore, SecretStore};
use cm_proto::UserId;

use crate::error::ChatError;
use crate::paths;
use crate::transport::ReconnectPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000/messaging/socket";
pub const DIRECTORY_REFRESH: Duration = Duration::from_secs(30);

const KEYRING_SERVICE: &str = "CampusMessenger";

/// Who the local user is; sent in join/leave frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretBackend {
    File(PathBuf),
    Keyring,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_base_url: String,
    pub socket_url: String,
    pub access_token: Option<String>,
    pub identity: SelfIdentity,
    pub secret_backend: SecretBackend,
    pub directory_refresh: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ChatConfig {
    pub fn new(api_base_url: impl Into<String>, socket_url: impl Into<String>, identity: SelfIdentity) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            socket_url: socket_url.into(),
            access_token: None,
            identity,
            secret_backend: SecretBackend::Memory,
            directory_refresh: DIRECTORY_REFRESH,
            reconnect: ReconnectPolicy::Never,
        }
    }

    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_id: UserId = lookup("CM_USER_ID")
            .ok_or_else(|| ChatError::Config("CM_USER_ID missing".into()))?
            .parse()
            .map_err(|e| ChatError::Config(format!("CM_USER_ID: {e}")))?;
        let username = lookup("CM_USERNAME").unwrap_or_else(|| format!("user-{user_id}"));

        let mut config = Self::new(
            lookup("CM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            lookup("CM_SOCKET_URL").unwrap_or_else(|| DEFAULT_SOCKET_URL.to_string()),
            SelfIdentity { user_id, username },
        );
        config.access_token = lookup("CM_ACCESS_TOKEN").filter(|t| !t.is_empty());

        config.secret_backend = match lookup("CM_SECRET_BACKEND").as_deref() {
            None | Some("file") => SecretBackend::File(paths::master_secret_path()?),
            Some("keyring") => SecretBackend::Keyring,
            Some("memory") => SecretBackend::Memory,
            Some(other) => {
                return Err(ChatError::Config(format!("unknown CM_SECRET_BACKEND {other:?}")))
            }
        };

        config.reconnect = match lookup("CM_RECONNECT").as_deref() {
            None | Some("never") => ReconnectPolicy::Never,
            Some("backoff") => ReconnectPolicy::default_backoff(),
            Some(other) => return Err(ChatError::Config(format!("unknown CM_RECONNECT {other:?}"))),
        };

        Ok(config)
    }

    /// Construct the secret store this configuration names.
    pub fn secret_store(&self) -> Arc<dyn SecretStore> {
        match &self.secret_backend {
            SecretBackend::File(path) => Arc::new(FileSecretStore::new(path.clone())),
            SecretBackend::Keyring => Arc::new(KeyringSecretStore::new(
                KEYRING_SERVICE,
                format!("master-secret:{}", self.identity.user_id),
            )),
            SecretBackend::Memory => Arc::new(MemorySecretStore::new()),
        }
    }
}

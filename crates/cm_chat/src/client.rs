//! Top-level handle tying the services together.
//!
//! Owns the REST client, encryption engine, event bus, directory and receipt
//! tracker, and at most one open `ConversationView`. Opening a conversation
//! closes the previous one first, so only one push channel is ever live.

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use cm_crypto::EncryptionEngine;
use cm_proto::api::UserSummary;
use cm_proto::UserId;

use crate::api::{HttpMessagingApi, MessagingApi};
use crate::config::{ChatConfig, SelfIdentity};
use crate::conversation::{ConversationView, ViewDeps};
use crate::directory::ConversationDirectory;
use crate::error::ChatError;
use crate::events::EventBus;
use crate::receipts::ReadReceiptTracker;
use crate::transport::{Connector, WsConnector};

pub struct ChatClient {
    config: ChatConfig,
    api: Arc<dyn MessagingApi>,
    engine: EncryptionEngine,
    bus: EventBus,
    connector: Arc<dyn Connector>,
    receipts: Arc<ReadReceiptTracker>,
    directory: Arc<ConversationDirectory>,
    directory_task: SyncMutex<Option<JoinHandle<()>>>,
    active: Mutex<Option<Arc<ConversationView>>>,
}

impl ChatClient {
    pub fn new(
        config: ChatConfig,
        api: Arc<dyn MessagingApi>,
        connector: Arc<dyn Connector>,
        engine: EncryptionEngine,
    ) -> Self {
        let bus = EventBus::new();
        let receipts = Arc::new(ReadReceiptTracker::new(api.clone(), bus.clone(), config.identity.user_id));
        let directory = Arc::new(ConversationDirectory::new(api.clone(), Some(engine.clone()), bus.clone()));
        Self {
            config,
            api,
            engine,
            bus,
            connector,
            receipts,
            directory,
            directory_task: SyncMutex::new(None),
            active: Mutex::new(None),
        }
    }

    /// Production wiring: reqwest, WebSocket, and the configured secret store.
    pub fn from_config(config: ChatConfig) -> Result<Self, ChatError> {
        let api = Arc::new(HttpMessagingApi::new(&config.api_base_url, config.access_token.clone())?);
        let connector = Arc::new(WsConnector::new(config.socket_url.clone()));
        let engine = EncryptionEngine::new(config.secret_store());
        Ok(Self::new(config, api, connector, engine))
    }

    pub fn identity(&self) -> &SelfIdentity {
        &self.config.identity
    }

    pub fn engine(&self) -> &EncryptionEngine {
        &self.engine
    }

    pub fn directory(&self) -> &Arc<ConversationDirectory> {
        &self.directory
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Start periodic directory refresh. Idempotent.
    pub fn start_directory(&self) {
        let mut task = self.directory_task.lock();
        if task.is_none() {
            *task = Some(self.directory.clone().spawn(self.config.directory_refresh));
        }
    }

    /// Short, non-secret identifier of this device's master secret.
    pub async fn secret_fingerprint(&self) -> Result<String, ChatError> {
        Ok(self.engine.master_secret().await?.fingerprint())
    }

    /// Everyone the local user can message, excluding themselves.
    pub async fn users(&self) -> Result<Vec<UserSummary>, ChatError> {
        let me = self.config.identity.user_id;
        let mut users = self.api.users().await?;
        users.retain(|u| u.id != me);
        Ok(users)
    }

    pub async fn open_conversation(&self, peer: UserId) -> Result<Arc<ConversationView>, ChatError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.close().await;
        }
        let view = ConversationView::open(peer, self.view_deps()).await?;
        *active = Some(view.clone());
        Ok(view)
    }

    pub async fn active_conversation(&self) -> Option<Arc<ConversationView>> {
        self.active.lock().await.clone()
    }

    pub async fn close_conversation(&self) {
        if let Some(view) = self.active.lock().await.take() {
            view.close().await;
        }
    }

    fn view_deps(&self) -> ViewDeps {
        ViewDeps {
            api: self.api.clone(),
            engine: self.engine.clone(),
            bus: self.bus.clone(),
            receipts: self.receipts.clone(),
            connector: self.connector.clone(),
            identity: self.config.identity.clone(),
            reconnect: self.config.reconnect,
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(task) = self.directory_task.lock().take() {
            task.abort();
        }
    }
}

//! Recent-conversations directory.
//!
//! One task owns refreshing: it wakes on the refresh interval and on every
//! `DirectoryEvent` from the bus, and refetches the full list. State is
//! published through a `watch` channel and is always exactly one of
//! Loading, Error, Populated or Empty.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use cm_crypto::EncryptionEngine;
use cm_proto::api::ConversationPreview;

use crate::api::MessagingApi;
use crate::error::ChatError;
use crate::events::{DirectoryEvent, EventBus};
use crate::store::DECRYPT_PLACEHOLDER;

#[derive(Debug, Clone)]
pub enum DirectoryState {
    Loading,
    Error(String),
    Populated(Vec<ConversationPreview>),
    Empty,
}

impl DirectoryState {
    pub fn rows(&self) -> &[ConversationPreview] {
        match self {
            DirectoryState::Populated(rows) => rows,
            _ => &[],
        }
    }

    fn has_result(&self) -> bool {
        matches!(self, DirectoryState::Populated(_) | DirectoryState::Empty)
    }
}

pub struct ConversationDirectory {
    api: Arc<dyn MessagingApi>,
    /// Decrypts last-message previews when present.
    engine: Option<EncryptionEngine>,
    bus: EventBus,
    state: watch::Sender<DirectoryState>,
    refreshing: Mutex<()>,
}

impl ConversationDirectory {
    pub fn new(api: Arc<dyn MessagingApi>, engine: Option<EncryptionEngine>, bus: EventBus) -> Self {
        let (state, _) = watch::channel(DirectoryState::Loading);
        Self {
            api,
            engine,
            bus,
            state,
            refreshing: Mutex::new(()),
        }
    }

    pub fn state(&self) -> DirectoryState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DirectoryState> {
        self.state.subscribe()
    }

    /// Refetch the full list. Rows already on screen stay there until the
    /// new list arrives; `Loading` only shows on first load or after an error.
    /// A failed refetch keeps a previous result and only surfaces `Error`
    /// when there is nothing to show.
    pub async fn refresh(&self) -> Result<(), ChatError> {
        let _guard = self.refreshing.lock().await;
        if !self.state.borrow().has_result() {
            self.state.send_replace(DirectoryState::Loading);
        }

        match self.api.recent_conversations().await {
            Ok(mut rows) => {
                self.decrypt_previews(&mut rows).await;
                let count = rows.len();
                let next = if rows.is_empty() {
                    DirectoryState::Empty
                } else {
                    DirectoryState::Populated(rows)
                };
                self.state.send_replace(next);
                tracing::debug!(target: "cm_chat", event = "directory_refreshed", count);
                Ok(())
            }
            Err(e) => {
                let stale = self.state.borrow().has_result();
                tracing::warn!(target: "cm_chat", event = "directory_refresh_failed", stale, error = %e);
                if !stale {
                    self.state.send_replace(DirectoryState::Error(e.to_string()));
                }
                Err(e)
            }
        }
    }

    pub async fn retry(&self) -> Result<(), ChatError> {
        self.refresh().await
    }

    /// Ask the background task for a refresh without waiting on it.
    pub fn request_refresh(&self) {
        self.bus.publish(DirectoryEvent::RefreshAll);
    }

    /// Rows whose counterpart display name contains `query`, ignoring case.
    /// No network; an empty query returns every row.
    pub fn filter(&self, query: &str) -> Vec<ConversationPreview> {
        let needle = query.trim().to_lowercase();
        self.state
            .borrow()
            .rows()
            .iter()
            .filter(|row| needle.is_empty() || row.counterpart.display_name().to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    async fn decrypt_previews(&self, rows: &mut [ConversationPreview]) {
        let Some(engine) = &self.engine else { return };
        for row in rows.iter_mut() {
            let Some(last) = row.last_message.as_mut() else { continue };
            if !last.message_type.is_encrypted() {
                continue;
            }
            last.content = match engine.decrypt(&last.content).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(target: "cm_chat", room_id = %row.room_id, error = %e, "preview not decryptable");
                    DECRYPT_PLACEHOLDER.to_string()
                }
            };
        }
    }

    /// Start the refresh task. The first tick fires immediately.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        let mut events = self.bus.subscribe();
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    event = events.recv() => match event {
                        Ok(DirectoryEvent::Invalidate(room)) => {
                            tracing::debug!(target: "cm_chat", room_id = %room, "directory invalidated");
                        }
                        Ok(DirectoryEvent::RefreshAll) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(target: "cm_chat", skipped, "directory events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
                // Errors are already reflected in the published state.
                let _ = self.refresh().await;
            }
        })
    }
}

//! cm_chat: Campus Messenger conversation client
//!
//! # Module layout
//! - `client`       `ChatClient`: wiring, one open conversation at a time
//! - `conversation` `ConversationView`: history, push, send, presence
//! - `store`        per-room ordered message cache
//! - `transport`    room-scoped push channel state machine
//! - `receipts`     read receipts
//! - `directory`    recent-conversations list
//! - `events`       invalidation bus shared by directory and views
//! - `api`          `/messaging` REST client
//! - `config`, `paths`, `error`

pub mod api;
pub mod client;
pub mod config;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod events;
pub mod paths;
pub mod receipts;
pub mod store;
pub mod transport;

pub use api::{EncryptedUpload, HttpMessagingApi, MessagingApi};
pub use client::ChatClient;
pub use config::{ChatConfig, SecretBackend, SelfIdentity};
pub use conversation::{ConversationView, ViewDeps};
pub use directory::{ConversationDirectory, DirectoryState};
pub use error::ChatError;
pub use events::{DirectoryEvent, EventBus};
pub use receipts::ReadReceiptTracker;
pub use store::{FileUpload, MessageStore, DECRYPT_PLACEHOLDER};
pub use transport::{ChannelState, Connector, ReconnectPolicy, SocketPair, TransportChannel, WsConnector};

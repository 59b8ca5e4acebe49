//! cm_proto: Room identity, message model and wire types for Campus Messenger
//!
//! Everything here is plain data: no I/O, no crypto. Message `content`
//! fields on the wire carry envelope strings produced by `cm_crypto`.
//!
//! # Modules
//! - `room`    participant ids and the canonical room id resolver
//! - `message` wire message record and the decrypted domain message
//! - `frame`   push socket frames (join/leave, chat message, presence)
//! - `api`     REST request/response bodies

pub mod api;
pub mod error;
pub mod frame;
pub mod message;
pub mod room;

pub use error::ProtoError;
pub use frame::{ClientFrame, RoomMembership, ServerFrame};
pub use message::{Attachment, Message, MessageContent, MessageId, MessageType, WireMessage};
pub use room::{room_id, RoomId, UserId};

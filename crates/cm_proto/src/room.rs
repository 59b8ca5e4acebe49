//! Participant and room identity.
//!
//! A room is the unordered pair of its two participants. The room id is the
//! pair sorted ascending and joined with `-`, so both sides always resolve
//! the same id without asking the server.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

const ROOM_SEPARATOR: char = '-';

/// Positive numeric user id as issued by the platform backend.
/// Wire values go through the same positivity check as `UserId::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u64")]
pub struct UserId(u64);

impl UserId {
    /// Returns `None` for zero and negative ids.
    pub fn new(raw: i64) -> Option<Self> {
        if raw > 0 {
            Some(Self(raw as u64))
        } else {
            None
        }
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for UserId {
    type Error = ProtoError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| ProtoError::InvalidUserId(raw.to_string()))
    }
}

impl From<UserId> for u64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl FromStr for UserId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: i64 = s
            .trim()
            .parse()
            .map_err(|_| ProtoError::InvalidUserId(s.to_string()))?;
        Self::new(raw).ok_or_else(|| ProtoError::InvalidUserId(s.to_string()))
    }
}

/// Canonical conversation id for a pair of participants.
/// Deserialized through `FromStr`, so only canonical ids are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

/// Resolve the room shared by `a` and `b`. Commutative.
pub fn room_id(a: UserId, b: UserId) -> RoomId {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    RoomId(format!("{low}{ROOM_SEPARATOR}{high}"))
}

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the id back into its (lower, higher) participants.
    pub fn participants(&self) -> Result<(UserId, UserId), ProtoError> {
        let (a, b) = self
            .0
            .split_once(ROOM_SEPARATOR)
            .ok_or_else(|| ProtoError::InvalidRoomId(self.0.clone()))?;
        let a: UserId = a
            .parse()
            .map_err(|_| ProtoError::InvalidRoomId(self.0.clone()))?;
        let b: UserId = b
            .parse()
            .map_err(|_| ProtoError::InvalidRoomId(self.0.clone()))?;
        Ok((a, b))
    }

    /// The participant that is not `me`, or `None` when `me` is not in the room.
    pub fn counterpart(&self, me: UserId) -> Option<UserId> {
        let (a, b) = self.participants().ok()?;
        if a == me {
            Some(b)
        } else if b == me {
            Some(a)
        } else {
            None
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = ProtoError;

    /// Accepts only canonical ids (ascending order).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let candidate = RoomId(s.to_string());
        let (a, b) = candidate.participants()?;
        if a > b {
            return Err(ProtoError::InvalidRoomId(s.to_string()));
        }
        Ok(candidate)
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtoError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

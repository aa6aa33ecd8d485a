//! WebSocket frames exchanged between real-time clients and gateway nodes.
//!
//! Frames are JSON text frames tagged by `type` with `snake_case` variant
//! names, e.g. `{"type":"join","room":"orders"}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length of a room name, in bytes.
pub const MAX_ROOM_NAME_LEN: usize = 128;

/// Validated room name.
///
/// Restricted to ASCII alphanumerics and `:` `_` `.` `-` so that room names
/// can be embedded in broker channel names without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

/// Rejected room name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid room name `{0}`: use 1-128 characters from [A-Za-z0-9:_.-]")]
pub struct InvalidRoomName(pub String);

impl RoomName {
    /// Validates and wraps a room name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRoomName`] for empty, oversized, or non-conforming names.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidRoomName> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_ROOM_NAME_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'.' | b'-'));
        if valid {
            Ok(Self(name))
        } else {
            Err(InvalidRoomName(name))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomName {
    type Error = InvalidRoomName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomName> for String {
    fn from(value: RoomName) -> Self {
        value.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        room: RoomName,
    },
    Leave {
        room: RoomName,
    },
    Publish {
        room: RoomName,
        event: String,
        #[serde(default)]
        data: Value,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Joined {
        room: RoomName,
    },
    Left {
        room: RoomName,
    },
    Message {
        room: RoomName,
        event: String,
        data: Value,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
        #[serde(rename = "serverTime")]
        server_time: u64,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    /// Encodes the frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; only possible for non-string map keys
    /// inside `data`.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

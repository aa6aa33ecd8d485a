//! Envelope carried over the shared broker between gateway nodes.
//!
//! Encoded as named `MsgPack` (`rmp_serde::to_vec_named()`) so field names
//! survive schema evolution across rolling deploys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::realtime::RoomName;

/// A room message as forwarded through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub room: RoomName,
    pub event: String,
    pub data: Value,
    /// Node id of the publishing process.
    pub origin: String,
    /// Per-origin sequence number, monotonically increasing.
    pub seq: u64,
    /// Milliseconds since epoch at publish time.
    pub sent_at: u64,
}

impl Envelope {
    /// Encodes the envelope for the broker.
    ///
    /// # Errors
    ///
    /// Returns the `MsgPack` encoder error.
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Decodes an envelope received from the broker.
    ///
    /// # Errors
    ///
    /// Returns the `MsgPack` decoder error for foreign or corrupted payloads.
    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

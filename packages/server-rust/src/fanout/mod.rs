//! Distributed real-time fan-out.
//!
//! Room messages published on one gateway node reach WebSocket connections
//! on every other gateway node through a shared broker. Each room maps to
//! one broker channel; room presence is kept in a broker-side set so that
//! membership is always the union across nodes. Each node also holds an
//! expiring lease, and entries of nodes whose lease lapsed are ignored.

pub mod adapter;
pub mod broker;
pub mod emitter;
pub mod memory;
pub mod redis;

use std::time::Duration;

use gatehouse_core::RoomName;

pub use adapter::FanoutAdapter;
pub use broker::{Broker, BrokerError, BrokerMessage};
pub use emitter::RoomEmitter;
pub use memory::MemoryBroker;
pub use redis::RedisBroker;

/// Key namespace shared by every gatehouse node on one broker.
pub const DEFAULT_CHANNEL_PREFIX: &str = "gatehouse:";

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Identifier of this node; stamped on every envelope it publishes.
    pub node_id: String,
    pub channel_prefix: String,
    /// Capacity of the queue feeding the ordered publisher task.
    pub publish_queue_capacity: usize,
    /// Attempts per envelope before it is dropped.
    pub max_publish_attempts: u32,
    /// First retry delay; doubles on each further attempt.
    pub retry_base_delay: Duration,
    /// How long this node's presence entries stay valid without a heartbeat.
    pub presence_ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl FanoutConfig {
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            publish_queue_capacity: 1024,
            max_publish_attempts: 5,
            retry_base_delay: Duration::from_millis(50),
            presence_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
        }
    }

    /// Broker channel carrying messages for `room`.
    #[must_use]
    pub fn room_channel(&self, room: &RoomName) -> String {
        format!("{}room:{room}", self.channel_prefix)
    }

    /// Common prefix of every room channel.
    #[must_use]
    pub fn room_channel_prefix(&self) -> String {
        format!("{}room:", self.channel_prefix)
    }

    /// Broker set listing the members of `room` across nodes.
    #[must_use]
    pub fn members_key(&self, room: &RoomName) -> String {
        format!("{}members:{room}", self.channel_prefix)
    }

    /// Broker lease marking `node_id` as alive.
    #[must_use]
    pub fn node_key(&self, node_id: &str) -> String {
        format!("{}node:{node_id}", self.channel_prefix)
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

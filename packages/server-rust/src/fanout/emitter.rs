//! Publish-only access to room channels.
//!
//! Processes that hold no WebSocket connections (the worker role) use a
//! `RoomEmitter` to push events to whichever gateway nodes have members in
//! a room.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gatehouse_core::{Envelope, RoomName};
use serde_json::Value;
use tracing::debug;

use super::broker::Broker;
use super::{now_millis, FanoutConfig, FanoutError};

#[derive(Clone)]
pub struct RoomEmitter {
    config: FanoutConfig,
    broker: Arc<dyn Broker>,
    seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for RoomEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomEmitter")
            .field("node_id", &self.config.node_id)
            .finish_non_exhaustive()
    }
}

impl RoomEmitter {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, config: FanoutConfig) -> Self {
        Self {
            config,
            broker,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publishes one event to a room.
    ///
    /// # Errors
    ///
    /// Returns the broker or encoding error. No retry happens here; job
    /// handlers rely on the queue's own retry.
    pub async fn emit(&self, room: &RoomName, event: &str, data: Value) -> Result<(), FanoutError> {
        let envelope = Envelope {
            room: room.clone(),
            event: event.to_string(),
            data,
            origin: self.config.node_id.clone(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            sent_at: now_millis(),
        };
        let payload = envelope.encode()?;
        self.broker
            .publish(&self.config.room_channel(room), payload)
            .await?;
        debug!(%room, event, "room event emitted");
        Ok(())
    }
}

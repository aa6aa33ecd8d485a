//! Real-time connection registry.
//!
//! Each WebSocket connection owns a bounded outbound channel; the registry
//! holds the sender half in a `DashMap` so any task can deliver to any
//! connection without blocking on a slow peer.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gatehouse_core::RoomName;
use tokio::sync::{mpsc, RwLock};

use super::config::ConnectionConfig;

/// Registry-assigned connection identifier, unique within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message queued for a connection's write loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A JSON text frame.
    Text(String),
    /// A close frame with an optional reason.
    Close(Option<String>),
}

/// Sender half and metadata of one live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<OutboundMessage>,
    pub metadata: Arc<RwLock<ConnectionMetadata>>,
}

impl ConnectionHandle {
    /// Queues a message without waiting. Returns `false` if the channel is
    /// full or closed.
    #[must_use]
    pub fn try_send(&self, msg: OutboundMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Mutable per-connection state.
#[derive(Debug, Default)]
pub struct ConnectionMetadata {
    /// Rooms this connection has joined.
    pub rooms: HashSet<RoomName>,
    pub remote_addr: Option<SocketAddr>,
}

/// All live connections of this process.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Identifiers start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection and returns its handle plus the receiver for
    /// the write loop.
    pub fn register(
        &self,
        config: &ConnectionConfig,
        remote_addr: Option<SocketAddr>,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);

        let metadata = ConnectionMetadata {
            remote_addr,
            ..ConnectionMetadata::default()
        };
        let handle = Arc::new(ConnectionHandle {
            id,
            tx,
            metadata: Arc::new(RwLock::new(metadata)),
        });

        self.connections.insert(id, Arc::clone(&handle));
        (handle, rx)
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Removes and returns every connection. Used during shutdown.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let keys: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();

        keys.into_iter()
            .filter_map(|key| self.connections.remove(&key).map(|(_, handle)| handle))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_channel_config() -> ConnectionConfig {
        ConnectionConfig {
            outbound_channel_capacity: 2,
            ..ConnectionConfig::default()
        }
    }

    fn text(s: &str) -> OutboundMessage {
        OutboundMessage::Text(s.to_string())
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let registry = ConnectionRegistry::new();
        let config = ConnectionConfig::default();

        let (h1, _rx1) = registry.register(&config, None);
        let (h2, _rx2) = registry.register(&config, None);
        assert_eq!(h1.id, ConnectionId(1));
        assert_eq!(h2.id, ConnectionId(2));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn remove_and_get() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(&ConnectionConfig::default(), None);
        let id = handle.id;

        assert_eq!(registry.get(id).map(|h| h.id), Some(id));
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.get(id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn remote_addr_recorded_in_metadata() {
        let registry = ConnectionRegistry::new();
        let addr: SocketAddr = "10.0.0.7:5123".parse().unwrap();
        let (handle, _rx) = registry.register(&ConnectionConfig::default(), Some(addr));

        let meta = handle.metadata.read().await;
        assert_eq!(meta.remote_addr, Some(addr));
        assert!(meta.rooms.is_empty());
    }

    #[test]
    fn drain_all_empties_registry() {
        let registry = ConnectionRegistry::new();
        let config = ConnectionConfig::default();
        let (_h1, _rx1) = registry.register(&config, None);
        let (_h2, _rx2) = registry.register(&config, None);

        assert_eq!(registry.drain_all().len(), 2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn try_send_respects_capacity() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(&small_channel_config(), None);

        assert!(handle.try_send(text("a")));
        assert!(handle.try_send(text("b")));
        assert!(!handle.try_send(text("c")));
    }

    #[test]
    fn try_send_fails_after_disconnect() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = registry.register(&ConnectionConfig::default(), None);
        assert!(handle.is_connected());

        drop(rx);
        assert!(!handle.is_connected());
        assert!(!handle.try_send(text("a")));
    }
}

//! Gateway-side fan-out adapter.
//!
//! Local delivery happens synchronously in `publish`; the envelope is then
//! queued for a single publisher task, which forwards envelopes to the broker
//! strictly in queue order. When that queue is full the envelope is dropped
//! rather than stalling the caller. A second task receives envelopes from
//! other nodes and hands them to local room members, and a third keeps this
//! node's presence lease alive.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use gatehouse_core::{Envelope, RoomName, ServerFrame};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, BrokerMessage};
use super::{now_millis, FanoutConfig, FanoutError};
use crate::network::{ConnectionHandle, ConnectionId, ConnectionRegistry, OutboundMessage};
use crate::service::{ManagedService, ServiceContext};

pub struct FanoutAdapter {
    config: FanoutConfig,
    broker: Arc<dyn Broker>,
    registry: Arc<ConnectionRegistry>,
    rooms: DashMap<RoomName, HashSet<ConnectionId>>,
    outbound: mpsc::Sender<Envelope>,
    seq: AtomicU64,
    dropped: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for FanoutAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutAdapter")
            .field("node_id", &self.config.node_id)
            .field("rooms", &self.rooms.len())
            .finish_non_exhaustive()
    }
}

impl FanoutAdapter {
    /// Subscribes to every room channel and starts the publisher and
    /// inbound tasks.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::Broker`] when the broker cannot be reached.
    /// There is no local-only fallback.
    pub async fn attach(
        broker: Arc<dyn Broker>,
        registry: Arc<ConnectionRegistry>,
        config: FanoutConfig,
    ) -> Result<Arc<Self>, FanoutError> {
        broker.ping().await?;
        let inbound = broker.subscribe_prefix(&config.room_channel_prefix()).await?;
        broker
            .renew_lease(&config.node_key(&config.node_id), config.presence_ttl)
            .await?;
        let (outbound, queue) = mpsc::channel(config.publish_queue_capacity);

        let adapter = Arc::new(Self {
            config,
            broker,
            registry,
            rooms: DashMap::new(),
            outbound,
            seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        });

        let publisher = tokio::spawn(run_publisher(
            Arc::clone(&adapter.broker),
            adapter.config.clone(),
            queue,
        ));
        let receiver = tokio::spawn(run_inbound(Arc::downgrade(&adapter), inbound));
        let heartbeat = tokio::spawn(run_heartbeat(
            Arc::clone(&adapter.broker),
            adapter.config.clone(),
        ));
        adapter.tasks.lock().extend([publisher, receiver, heartbeat]);

        info!(
            node_id = %adapter.config.node_id,
            prefix = %adapter.config.room_channel_prefix(),
            "fan-out adapter attached"
        );
        Ok(adapter)
    }

    /// Publishes a message to a room on every gateway node.
    ///
    /// Returns the number of local connections the message was handed to.
    /// Broker forwarding is asynchronous and never fails or blocks the
    /// caller; envelopes that find the publisher queue full are dropped.
    pub async fn publish(&self, room: &RoomName, event: &str, data: Value) -> usize {
        let envelope = Envelope {
            room: room.clone(),
            event: event.to_string(),
            data,
            origin: self.config.node_id.clone(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            sent_at: now_millis(),
        };

        let delivered = self.deliver_local(&envelope);
        match self.outbound.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    %room,
                    seq = envelope.seq,
                    dropped,
                    "fan-out queue full; message delivered locally only"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%room, "fan-out publisher stopped; message delivered locally only");
            }
        }
        delivered
    }

    /// Adds a connection to a room.
    pub async fn join(&self, handle: &ConnectionHandle, room: &RoomName) {
        handle.metadata.write().await.rooms.insert(room.clone());
        self.rooms.entry(room.clone()).or_default().insert(handle.id);

        if let Err(e) = self
            .broker
            .add_member(&self.config.members_key(room), &self.member_id(handle.id))
            .await
        {
            warn!(%room, conn = %handle.id, error = %e, "failed to record room presence");
        }
        debug!(%room, conn = %handle.id, "joined room");
    }

    /// Removes a connection from a room.
    pub async fn leave(&self, handle: &ConnectionHandle, room: &RoomName) {
        handle.metadata.write().await.rooms.remove(room);
        self.forget(handle.id, room).await;
    }

    /// Removes a connection from every room it joined. Called on close.
    pub async fn leave_all(&self, handle: &ConnectionHandle) {
        let rooms: Vec<RoomName> = handle.metadata.write().await.rooms.drain().collect();
        for room in &rooms {
            self.forget(handle.id, room).await;
        }
    }

    /// Members of a room across all nodes, as `node_id:connection_id`.
    ///
    /// Entries of nodes whose lease has lapsed are left out and pruned from
    /// the broker set.
    ///
    /// # Errors
    ///
    /// Returns the broker error; presence is never served from a local cache.
    pub async fn room_members(&self, room: &RoomName) -> Result<Vec<String>, FanoutError> {
        let key = self.config.members_key(room);
        let members = self.broker.members(&key).await?;

        let nodes: Vec<String> = members
            .iter()
            .filter_map(|member| member_node(member))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let leases: Vec<String> = nodes.iter().map(|node| self.config.node_key(node)).collect();
        let held = self.broker.leases_held(&leases).await?;
        let live: HashSet<String> = nodes
            .into_iter()
            .zip(held)
            .filter_map(|(node, held)| held.then_some(node))
            .collect();

        let (alive, stale): (Vec<String>, Vec<String>) = members
            .into_iter()
            .partition(|member| member_node(member).is_some_and(|node| live.contains(node)));
        for member in &stale {
            if let Err(e) = self.broker.remove_member(&key, member).await {
                debug!(%room, %member, error = %e, "failed to prune stale presence");
            }
        }
        if !stale.is_empty() {
            info!(%room, pruned = stale.len(), "pruned presence of departed nodes");
        }
        Ok(alive)
    }

    /// Envelopes dropped because the publisher queue was full.
    #[must_use]
    pub fn dropped_envelopes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of connections on this node that joined `room`.
    #[must_use]
    pub fn local_member_count(&self, room: &RoomName) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    fn member_id(&self, conn: ConnectionId) -> String {
        format!("{}:{conn}", self.config.node_id)
    }

    async fn forget(&self, conn: ConnectionId, room: &RoomName) {
        let now_empty = self.rooms.get_mut(room).is_some_and(|mut members| {
            members.remove(&conn);
            members.is_empty()
        });
        if now_empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }

        if let Err(e) = self
            .broker
            .remove_member(&self.config.members_key(room), &self.member_id(conn))
            .await
        {
            warn!(%room, %conn, error = %e, "failed to clear room presence");
        }
    }

    fn deliver_local(&self, envelope: &Envelope) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(&envelope.room) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let frame = ServerFrame::Message {
            room: envelope.room.clone(),
            event: envelope.event.clone(),
            data: envelope.data.clone(),
        };
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(room = %envelope.room, error = %e, "failed to encode room message");
                return 0;
            }
        };

        let mut delivered = 0;
        for id in members {
            let Some(handle) = self.registry.get(id) else {
                continue;
            };
            if handle.try_send(OutboundMessage::Text(text.clone())) {
                delivered += 1;
            } else {
                debug!(conn = %id, room = %envelope.room, "connection backlogged; message skipped");
            }
        }
        delivered
    }

    fn handle_inbound(&self, message: &BrokerMessage) {
        let envelope = match Envelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "discarding undecodable envelope");
                return;
            }
        };
        if envelope.origin == self.config.node_id {
            return;
        }
        self.deliver_local(&envelope);
    }

    /// Clears this node's presence entries and lease, then stops the
    /// background tasks.
    pub async fn detach(&self) {
        let memberships: HashMap<RoomName, Vec<ConnectionId>> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().iter().copied().collect()))
            .collect();
        self.rooms.clear();

        for (room, conns) in memberships {
            let key = self.config.members_key(&room);
            for conn in conns {
                if let Err(e) = self.broker.remove_member(&key, &self.member_id(conn)).await {
                    warn!(%room, %conn, error = %e, "failed to clear room presence on shutdown");
                }
            }
        }

        let lease = self.config.node_key(&self.config.node_id);
        if let Err(e) = self.broker.release_lease(&lease).await {
            warn!(error = %e, "failed to release presence lease on shutdown");
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Node part of a `node_id:connection_id` member entry.
fn member_node(member: &str) -> Option<&str> {
    member.rsplit_once(':').map(|(node, _)| node)
}

#[async_trait]
impl ManagedService for FanoutAdapter {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.detach().await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let backoff = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter_cap = u64::try_from(base.as_millis()).unwrap_or(u64::MAX).max(1);
    backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_cap))
}

async fn run_publisher(
    broker: Arc<dyn Broker>,
    config: FanoutConfig,
    mut queue: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = queue.recv().await {
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(room = %envelope.room, error = %e, "failed to encode envelope");
                continue;
            }
        };
        let channel = config.room_channel(&envelope.room);

        let mut attempt = 1;
        loop {
            match broker.publish(&channel, payload.clone()).await {
                Ok(()) => break,
                Err(e) if attempt < config.max_publish_attempts => {
                    let delay = retry_delay(config.retry_base_delay, attempt);
                    warn!(%channel, attempt, error = %e, ?delay, "broker publish failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        %channel,
                        seq = envelope.seq,
                        attempts = attempt,
                        error = %e,
                        "broker publish failed; message not forwarded to other nodes"
                    );
                    break;
                }
            }
        }
    }
}

async fn run_heartbeat(broker: Arc<dyn Broker>, config: FanoutConfig) {
    let key = config.node_key(&config.node_id);
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = broker.renew_lease(&key, config.presence_ttl).await {
            warn!(node_id = %config.node_id, error = %e, "failed to renew presence lease");
        }
    }
}

async fn run_inbound(
    adapter: std::sync::Weak<FanoutAdapter>,
    mut inbound: mpsc::Receiver<BrokerMessage>,
) {
    while let Some(message) = inbound.recv().await {
        let Some(adapter) = adapter.upgrade() else {
            return;
        };
        adapter.handle_inbound(&message);
    }
    warn!("broker subscription closed; remote room messages will no longer arrive");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fanout::MemoryBroker;
    use crate::network::ConnectionConfig;

    fn room(name: &str) -> RoomName {
        RoomName::new(name).unwrap()
    }

    fn fast_config(node: &str) -> FanoutConfig {
        FanoutConfig {
            retry_base_delay: Duration::from_millis(5),
            max_publish_attempts: 3,
            ..FanoutConfig::new(node)
        }
    }

    async fn node(
        broker: &MemoryBroker,
        name: &str,
    ) -> (Arc<FanoutAdapter>, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let adapter = FanoutAdapter::attach(
            Arc::new(broker.clone()),
            Arc::clone(&registry),
            fast_config(name),
        )
        .await
        .unwrap();
        (adapter, registry)
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<OutboundMessage>) -> Value {
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        match msg {
            OutboundMessage::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected outbound message {other:?}"),
        }
    }

    #[tokio::test]
    async fn attach_fails_fast_when_broker_is_down() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let result = FanoutAdapter::attach(
            Arc::new(broker),
            Arc::new(ConnectionRegistry::new()),
            fast_config("a"),
        )
        .await;
        assert!(matches!(result, Err(FanoutError::Broker(_))));
    }

    #[tokio::test]
    async fn message_crosses_nodes_exactly_once() {
        let broker = MemoryBroker::new();
        let (a, registry_a) = node(&broker, "node-a").await;
        let (b, registry_b) = node(&broker, "node-b").await;

        let (sender, mut sender_rx) = registry_a.register(&ConnectionConfig::default(), None);
        let (listener, mut listener_rx) = registry_b.register(&ConnectionConfig::default(), None);
        a.join(&sender, &room("R")).await;
        b.join(&listener, &room("R")).await;

        let local = a.publish(&room("R"), "chat", json!({"text": "hi"})).await;
        assert_eq!(local, 1);

        let on_a = recv_frame(&mut sender_rx).await;
        let on_b = recv_frame(&mut listener_rx).await;
        let expected = json!({"type": "message", "room": "R", "event": "chat", "data": {"text": "hi"}});
        assert_eq!(on_a, expected);
        assert_eq!(on_b, expected);

        // Own envelope coming back from the broker is not delivered twice.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_rooms_do_not_receive() {
        let broker = MemoryBroker::new();
        let (a, _) = node(&broker, "node-a").await;
        let (b, registry_b) = node(&broker, "node-b").await;

        let (listener, mut listener_rx) = registry_b.register(&ConnectionConfig::default(), None);
        b.join(&listener, &room("other")).await;

        a.publish(&room("R"), "chat", Value::Null).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(listener_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_room_order_is_preserved_across_nodes() {
        let broker = MemoryBroker::new();
        let (a, _) = node(&broker, "node-a").await;
        let (b, registry_b) = node(&broker, "node-b").await;

        let (listener, mut listener_rx) = registry_b.register(&ConnectionConfig::default(), None);
        b.join(&listener, &room("R")).await;

        for i in 0..20 {
            a.publish(&room("R"), "tick", json!(i)).await;
        }
        for i in 0..20 {
            assert_eq!(recv_frame(&mut listener_rx).await["data"], json!(i));
        }
    }

    #[tokio::test]
    async fn presence_is_the_union_across_nodes() {
        let broker = MemoryBroker::new();
        let (a, registry_a) = node(&broker, "node-a").await;
        let (b, registry_b) = node(&broker, "node-b").await;

        let (c1, _rx1) = registry_a.register(&ConnectionConfig::default(), None);
        let (c2, _rx2) = registry_b.register(&ConnectionConfig::default(), None);
        a.join(&c1, &room("R")).await;
        b.join(&c2, &room("R")).await;

        assert_eq!(
            a.room_members(&room("R")).await.unwrap(),
            vec!["node-a:1".to_string(), "node-b:1".to_string()]
        );

        b.leave_all(&c2).await;
        assert_eq!(a.room_members(&room("R")).await.unwrap(), vec!["node-a:1"]);
        assert_eq!(b.local_member_count(&room("R")), 0);
        assert!(c2.metadata.read().await.rooms.is_empty());

        a.detach().await;
        assert!(b.room_members(&room("R")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn broker_outage_does_not_fail_publish() {
        let broker = MemoryBroker::new();
        let (a, registry_a) = node(&broker, "node-a").await;
        let (conn, mut rx) = registry_a.register(&ConnectionConfig::default(), None);
        a.join(&conn, &room("R")).await;

        broker.set_available(false);
        assert_eq!(a.publish(&room("R"), "chat", json!(1)).await, 1);
        assert_eq!(recv_frame(&mut rx).await["data"], json!(1));

        // Publisher drops the envelope after its retries and keeps serving.
        tokio::time::sleep(Duration::from_millis(100)).await;
        broker.set_available(true);
        assert_eq!(a.publish(&room("R"), "chat", json!(2)).await, 1);
        assert_eq!(recv_frame(&mut rx).await["data"], json!(2));
    }

    #[tokio::test]
    async fn full_publish_queue_never_blocks_the_caller() {
        let broker = MemoryBroker::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let config = FanoutConfig {
            publish_queue_capacity: 4,
            retry_base_delay: Duration::from_millis(200),
            max_publish_attempts: 5,
            ..FanoutConfig::new("node-a")
        };
        let a = FanoutAdapter::attach(Arc::new(broker.clone()), Arc::clone(&registry), config)
            .await
            .unwrap();
        let (conn, mut rx) = registry.register(&ConnectionConfig::default(), None);
        a.join(&conn, &room("R")).await;

        broker.set_available(false);
        for i in 0..32 {
            let delivered = tokio::time::timeout(
                Duration::from_millis(100),
                a.publish(&room("R"), "tick", json!(i)),
            )
            .await
            .expect("publish waited on the broker");
            assert_eq!(delivered, 1);
            assert_eq!(recv_frame(&mut rx).await["data"], json!(i));
        }
        assert!(a.dropped_envelopes() > 0);
    }

    #[tokio::test]
    async fn crashed_node_drops_out_of_presence_after_its_lease() {
        let broker = MemoryBroker::new();
        let short_lease = |node: &str| FanoutConfig {
            presence_ttl: Duration::from_millis(80),
            heartbeat_interval: Duration::from_millis(20),
            ..fast_config(node)
        };
        let registry_a = Arc::new(ConnectionRegistry::new());
        let registry_b = Arc::new(ConnectionRegistry::new());
        let a = FanoutAdapter::attach(
            Arc::new(broker.clone()),
            Arc::clone(&registry_a),
            short_lease("node-a"),
        )
        .await
        .unwrap();
        let b = FanoutAdapter::attach(
            Arc::new(broker.clone()),
            Arc::clone(&registry_b),
            short_lease("node-b"),
        )
        .await
        .unwrap();

        let (c1, _rx1) = registry_a.register(&ConnectionConfig::default(), None);
        let (c2, _rx2) = registry_b.register(&ConnectionConfig::default(), None);
        a.join(&c1, &room("R")).await;
        b.join(&c2, &room("R")).await;

        // Node A stops heart-beating without detaching, as after a crash.
        for task in a.tasks.lock().drain(..) {
            task.abort();
        }

        // B keeps renewing its own lease past A's expiry.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(b.room_members(&room("R")).await.unwrap(), vec!["node-b:1"]);
        let key = b.config.members_key(&room("R"));
        assert_eq!(broker.members(&key).await.unwrap(), vec!["node-b:1"]);
    }

    #[test]
    fn member_node_keeps_colons_in_node_ids() {
        assert_eq!(member_node("edge:eu:12"), Some("edge:eu"));
        assert_eq!(member_node("plain"), None);
    }

    #[test]
    fn retry_delay_grows_exponentially() {
        let base = Duration::from_millis(10);
        let first = retry_delay(base, 1);
        let third = retry_delay(base, 3);
        assert!(first >= base && first <= base * 2);
        assert!(third >= base * 4 && third <= base * 5);
    }
}

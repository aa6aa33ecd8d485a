//! Shared message broker abstraction.
//!
//! The broker carries room messages between gateway nodes on pattern-named
//! channels and keeps cross-node room presence in named sets.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Capacity of the channel handed out by [`Broker::subscribe_prefix`].
pub const SUBSCRIPTION_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("broker command failed: {0}")]
    Command(String),
}

/// One message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Round-trips to the broker.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Publishes a payload on a channel.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Subscribes to every channel whose name starts with `prefix`.
    ///
    /// The subscription is live when this returns. The receiver closes only
    /// when the broker side gives up for good.
    async fn subscribe_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError>;

    async fn add_member(&self, set: &str, member: &str) -> Result<(), BrokerError>;

    async fn remove_member(&self, set: &str, member: &str) -> Result<(), BrokerError>;

    async fn members(&self, set: &str) -> Result<Vec<String>, BrokerError>;

    /// Creates or extends a lease that expires after `ttl`.
    async fn renew_lease(&self, key: &str, ttl: Duration) -> Result<(), BrokerError>;

    /// Whether each lease is currently held, in the order given.
    async fn leases_held(&self, keys: &[String]) -> Result<Vec<bool>, BrokerError>;

    async fn release_lease(&self, key: &str) -> Result<(), BrokerError>;
}

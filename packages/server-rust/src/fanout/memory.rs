//! In-process broker.
//!
//! Clones share one bus, so several gateway instances inside one process
//! behave like nodes attached to the same external broker.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::warn;

use super::broker::{Broker, BrokerError, BrokerMessage, SUBSCRIPTION_CAPACITY};

const BUS_CAPACITY: usize = 4096;

#[derive(Debug)]
struct Inner {
    bus: broadcast::Sender<BrokerMessage>,
    sets: DashMap<String, BTreeSet<String>>,
    leases: DashMap<String, Instant>,
    available: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        let (bus, _rx) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                bus,
                sets: DashMap::new(),
                leases: DashMap::new(),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BrokerError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("in-memory broker offline".to_string()))
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        self.check()
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.check()?;
        // No subscribers is not an error, same as a real broker.
        let _ = self.inner.bus.send(BrokerMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        self.check()?;
        let mut bus = self.inner.bus.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(message) => {
                        if message.channel.starts_with(&prefix)
                            && tx.send(message).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "in-memory subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }

    async fn add_member(&self, set: &str, member: &str) -> Result<(), BrokerError> {
        self.check()?;
        self.inner
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_member(&self, set: &str, member: &str) -> Result<(), BrokerError> {
        self.check()?;
        let now_empty = self
            .inner
            .sets
            .get_mut(set)
            .is_some_and(|mut members| {
                members.remove(member);
                members.is_empty()
            });
        if now_empty {
            self.inner.sets.remove_if(set, |_, members| members.is_empty());
        }
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>, BrokerError> {
        self.check()?;
        Ok(self
            .inner
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn renew_lease(&self, key: &str, ttl: Duration) -> Result<(), BrokerError> {
        self.check()?;
        self.inner.leases.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn leases_held(&self, keys: &[String]) -> Result<Vec<bool>, BrokerError> {
        self.check()?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| self.inner.leases.get(key).is_some_and(|expiry| *expiry > now))
            .collect())
    }

    async fn release_lease(&self, key: &str) -> Result<(), BrokerError> {
        self.check()?;
        self.inner.leases.remove(key);
        Ok(())
    }
}

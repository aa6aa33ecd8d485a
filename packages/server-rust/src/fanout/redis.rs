//! Redis-backed broker.
//!
//! Commands go through a `bb8` pool of multiplexed connections. Pattern
//! subscriptions need a dedicated connection, so each `subscribe_prefix`
//! opens its own pub/sub connection and keeps it alive across disconnects.
//! Node leases are plain keys with a millisecond expiry.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::redis;
use bb8_redis::RedisConnectionManager;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::broker::{Broker, BrokerError, BrokerMessage, SUBSCRIPTION_CAPACITY};

pub type RedisPool = Pool<RedisConnectionManager>;

const POOL_MAX_SIZE: u32 = 16;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    pool: RedisPool,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker").finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Builds the command pool and verifies the broker answers.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] for malformed URLs or when the
    /// broker cannot be reached within the connect timeout.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let manager =
            RedisConnectionManager::new(url).map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(POOL_MAX_SIZE)
            .connection_timeout(CONNECT_TIMEOUT)
            .build(manager)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let broker = Self { client, pool };
        broker.ping().await?;
        info!("connected to redis broker");
        Ok(broker)
    }

    /// Command pool, shared with the job queue.
    #[must_use]
    pub fn pool(&self) -> RedisPool {
        self.pool.clone()
    }

    async fn conn(&self) -> Result<PooledConnection<'_, RedisConnectionManager>, BrokerError> {
        self.pool
            .get()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }

    async fn open_pubsub(&self, pattern: &str) -> Result<redis::aio::PubSub, BrokerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| BrokerError::Command(e.to_string()))?;
        Ok(pubsub)
    }
}

/// Escapes glob metacharacters so a literal prefix can be used in `PSUBSCRIBE`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn command_error(e: &impl std::fmt::Display) -> BrokerError {
    BrokerError::Command(e.to_string())
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(())
    }

    async fn subscribe_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        let pattern = format!("{}*", glob_escape(prefix));
        let first = self.open_pubsub(&pattern).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let broker = self.clone();

        tokio::spawn(async move {
            let mut pubsub = Some(first);
            let mut delay = Duration::from_millis(100);
            loop {
                let Some(active) = pubsub.take() else {
                    tokio::time::sleep(delay).await;
                    match broker.open_pubsub(&pattern).await {
                        Ok(fresh) => {
                            info!(%pattern, "redis subscription restored");
                            delay = Duration::from_millis(100);
                            pubsub = Some(fresh);
                        }
                        Err(e) => {
                            warn!(%pattern, error = %e, "redis resubscribe failed");
                            delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
                        }
                    }
                    continue;
                };

                let mut messages = active.into_on_message();
                while let Some(msg) = messages.next().await {
                    let message = BrokerMessage {
                        channel: msg.get_channel_name().to_string(),
                        payload: msg.get_payload_bytes().to_vec(),
                    };
                    if tx.send(message).await.is_err() {
                        debug!(%pattern, "subscription receiver dropped");
                        return;
                    }
                }
                if tx.is_closed() {
                    return;
                }
                warn!(%pattern, "redis subscription connection lost");
            }
        });

        Ok(rx)
    }

    async fn add_member(&self, set: &str, member: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        redis::cmd("SADD")
            .arg(set)
            .arg(member)
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(())
    }

    async fn remove_member(&self, set: &str, member: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        redis::cmd("SREM")
            .arg(set)
            .arg(member)
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.conn().await?;
        let mut members = redis::cmd("SMEMBERS")
            .arg(set)
            .query_async::<Vec<String>>(&mut *conn)
            .await
            .map_err(|e| command_error(&e))?;
        members.sort();
        Ok(members)
    }

    async fn renew_lease(&self, key: &str, ttl: Duration) -> Result<(), BrokerError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("PX")
            .arg(millis)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| command_error(&e))
    }

    async fn leases_held(&self, keys: &[String]) -> Result<Vec<bool>, BrokerError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values = redis::cmd("MGET")
            .arg(keys)
            .query_async::<Vec<Option<String>>>(&mut *conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(values.iter().map(Option::is_some).collect())
    }

    async fn release_lease(&self, key: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(())
    }
}

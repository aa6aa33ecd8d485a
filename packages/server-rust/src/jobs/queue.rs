//! Shared job queues.
//!
//! The gateway pushes jobs, the worker pops them. Both roles register the
//! same queue provider in their module graph.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bb8_redis::redis;
use dashmap::DashMap;
use gatehouse_core::JobEnvelope;
use uuid::Uuid;

use crate::fanout::redis::RedisPool;
use crate::fanout::DEFAULT_CHANNEL_PREFIX;
use crate::service::{ManagedService, ServiceContext};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Backend(String),
    #[error("malformed job entry: {0}")]
    Codec(#[from] serde_json::Error),
}

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Appends a job to the tail of its queue.
    async fn push(&self, job: JobEnvelope) -> Result<(), QueueError>;

    /// Removes and returns the job at the head of `queue`, if any.
    async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, QueueError>;

    /// Number of jobs waiting in `queue`.
    async fn len(&self, queue: &str) -> Result<u64, QueueError>;
}

/// Builds a fresh job record for `queue`.
#[must_use]
pub fn new_job(queue: &str, name: &str, payload: serde_json::Value) -> JobEnvelope {
    JobEnvelope {
        id: Uuid::new_v4().to_string(),
        queue: queue.to_string(),
        name: name.to_string(),
        payload,
        enqueued_at: crate::fanout::now_millis(),
        attempts: 0,
    }
}

// ---------------------------------------------------------------------------
// In-memory queue
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct MemoryJobQueue {
    queues: Arc<DashMap<String, VecDeque<JobEnvelope>>>,
}

impl MemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, job: JobEnvelope) -> Result<(), QueueError> {
        self.queues
            .entry(job.queue.clone())
            .or_default()
            .push_back(job);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, QueueError> {
        Ok(self
            .queues
            .get_mut(queue)
            .and_then(|mut jobs| jobs.pop_front()))
    }

    async fn len(&self, queue: &str) -> Result<u64, QueueError> {
        Ok(self
            .queues
            .get(queue)
            .map_or(0, |jobs| u64::try_from(jobs.len()).unwrap_or(u64::MAX)))
    }
}

// ---------------------------------------------------------------------------
// Redis list queue
// ---------------------------------------------------------------------------

/// Redis list per queue: `RPUSH` to enqueue, `LPOP` to dequeue.
#[derive(Clone)]
pub struct RedisJobQueue {
    pool: RedisPool,
    prefix: String,
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }

    fn key(&self, queue: &str) -> String {
        format!("{}queue:{queue}", self.prefix)
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        cmd.query_async::<T>(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push(&self, job: JobEnvelope) -> Result<(), QueueError> {
        let raw = job.to_json()?;
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(self.key(&job.queue)).arg(raw);
        self.query::<i64>(&cmd).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, QueueError> {
        let mut cmd = redis::cmd("LPOP");
        cmd.arg(self.key(queue));
        let raw: Option<String> = self.query(&cmd).await?;
        raw.map(|raw| JobEnvelope::from_json(&raw))
            .transpose()
            .map_err(QueueError::from)
    }

    async fn len(&self, queue: &str) -> Result<u64, QueueError> {
        let mut cmd = redis::cmd("LLEN");
        cmd.arg(self.key(queue));
        self.query(&cmd).await
    }
}

// ---------------------------------------------------------------------------
// Module-graph provider
// ---------------------------------------------------------------------------

/// Registry entry exposing the shared queue to both roles.
pub struct QueueProvider {
    queue: Arc<dyn JobQueue>,
}

impl QueueProvider {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    #[must_use]
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::clone(&self.queue)
    }
}

#[async_trait]
impl ManagedService for QueueProvider {
    fn name(&self) -> &'static str {
        "job-queue"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

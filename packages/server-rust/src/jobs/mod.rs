//! Background job boundary.
//!
//! The gateway enqueues [`JobEnvelope`]s; the worker role drains them and
//! dispatches each one to the [`JobHandler`] registered for its queue. What a
//! handler does with a job is business logic and lives behind the trait.

pub mod consumer;
pub mod handlers;
pub mod queue;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::JobEnvelope;

pub use consumer::{ConsumerTask, JobConsumer, QueueConsumerService};
pub use handlers::ResourceCreatedHandler;
pub use queue::{new_job, JobQueue, MemoryJobQueue, QueueError, QueueProvider, RedisJobQueue};

/// Queue carrying resource lifecycle jobs.
pub const RESOURCES_QUEUE: &str = "resources";

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Queue this handler consumes.
    fn queue(&self) -> &'static str;

    async fn handle(&self, job: &JobEnvelope) -> anyhow::Result<()>;
}

/// Result of dispatching one job.
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed,
    Failed(anyhow::Error),
    /// No handler is registered for the job's queue.
    Unhandled,
}

/// Routes jobs to handlers by queue name.
#[derive(Default, Clone)]
pub struct JobDispatcher {
    handlers: BTreeMap<&'static str, Arc<dyn JobHandler>>,
}

impl JobDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; a later handler for the same queue replaces it.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.queue(), handler);
        self
    }

    /// Queues that have a handler, in name order.
    #[must_use]
    pub fn queues(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub async fn dispatch(&self, job: &JobEnvelope) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(job.queue.as_str()) else {
            return DispatchOutcome::Unhandled;
        };
        match handler.handle(job).await {
            Ok(()) => DispatchOutcome::Completed,
            Err(e) => DispatchOutcome::Failed(e),
        }
    }
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("queues", &self.queues())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;

    struct Counting {
        queue: &'static str,
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for Counting {
        fn queue(&self) -> &'static str {
            self.queue
        }

        async fn handle(&self, _job: &JobEnvelope) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler failed");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_by_queue_name() {
        let ok = Arc::new(Counting {
            queue: "a",
            calls: AtomicU32::new(0),
            fail: false,
        });
        let failing = Arc::new(Counting {
            queue: "b",
            calls: AtomicU32::new(0),
            fail: true,
        });
        let dispatcher = JobDispatcher::new()
            .with_handler(ok.clone())
            .with_handler(failing.clone());
        assert_eq!(dispatcher.queues(), vec!["a", "b"]);

        assert!(matches!(
            dispatcher.dispatch(&new_job("a", "x", json!(null))).await,
            DispatchOutcome::Completed
        ));
        assert!(matches!(
            dispatcher.dispatch(&new_job("b", "x", json!(null))).await,
            DispatchOutcome::Failed(_)
        ));
        assert!(matches!(
            dispatcher.dispatch(&new_job("c", "x", json!(null))).await,
            DispatchOutcome::Unhandled
        ));
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }
}

//! Worker-side queue consumer driven by the background worker tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::queue::JobQueue;
use super::{DispatchOutcome, JobDispatcher};
use crate::service::{BackgroundRunnable, BackgroundWorker, ManagedService, ServiceContext};

/// A job gets this many attempts before it is dropped.
pub const MAX_JOB_ATTEMPTS: u32 = 3;
/// Upper bound on jobs taken from one queue per tick.
pub const BATCH_SIZE: usize = 32;
/// Poll interval of the consumer.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub enum ConsumerTask {
    /// Drain the queues now instead of waiting for the next tick.
    Poll,
}

pub struct JobConsumer {
    queue: Arc<dyn JobQueue>,
    dispatcher: JobDispatcher,
}

impl JobConsumer {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, dispatcher: JobDispatcher) -> Self {
        Self { queue, dispatcher }
    }

    /// Takes up to [`BATCH_SIZE`] jobs from every handled queue and
    /// dispatches them. Returns the number of jobs taken.
    pub async fn drain_once(&self) -> usize {
        let mut taken = 0;
        for queue_name in self.dispatcher.queues() {
            for _ in 0..BATCH_SIZE {
                let job = match self.queue.pop(queue_name).await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(queue = queue_name, error = %e, "failed to pop job");
                        break;
                    }
                };
                taken += 1;
                self.process(job).await;
            }
        }
        taken
    }

    async fn process(&self, mut job: gatehouse_core::JobEnvelope) {
        match self.dispatcher.dispatch(&job).await {
            DispatchOutcome::Completed => {
                debug!(job_id = %job.id, queue = %job.queue, name = %job.name, "job completed");
            }
            DispatchOutcome::Unhandled => {
                warn!(job_id = %job.id, queue = %job.queue, "no handler for job; dropped");
            }
            DispatchOutcome::Failed(e) => {
                job.attempts += 1;
                if job.attempts >= MAX_JOB_ATTEMPTS {
                    error!(
                        job_id = %job.id,
                        queue = %job.queue,
                        attempts = job.attempts,
                        error = %e,
                        "job failed permanently; dropped"
                    );
                    return;
                }
                warn!(job_id = %job.id, attempts = job.attempts, error = %e, "job failed; requeued");
                if let Err(e) = self.queue.push(job).await {
                    error!(error = %e, "failed to requeue job");
                }
            }
        }
    }
}

#[async_trait]
impl BackgroundRunnable for JobConsumer {
    type Task = ConsumerTask;

    async fn run(&mut self, task: ConsumerTask) {
        match task {
            ConsumerTask::Poll => {
                self.drain_once().await;
            }
        }
    }

    async fn on_tick(&mut self) {
        self.drain_once().await;
    }

    async fn shutdown(&mut self) {
        info!("job consumer stopped");
    }
}

/// Owns the background worker that runs the [`JobConsumer`].
pub struct QueueConsumerService {
    queue: Arc<dyn JobQueue>,
    dispatcher: JobDispatcher,
    poll_interval: Duration,
    worker: tokio::sync::Mutex<Option<BackgroundWorker<JobConsumer>>>,
}

impl QueueConsumerService {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, dispatcher: JobDispatcher) -> Self {
        Self {
            queue,
            dispatcher,
            poll_interval: POLL_INTERVAL,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn queues(&self) -> Vec<&'static str> {
        self.dispatcher.queues()
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(BackgroundWorker::is_running)
    }
}

#[async_trait]
impl ManagedService for QueueConsumerService {
    fn name(&self) -> &'static str {
        "queue-consumer"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        let consumer = JobConsumer::new(Arc::clone(&self.queue), self.dispatcher.clone());
        let worker = BackgroundWorker::start(consumer, self.poll_interval);
        worker.submit(ConsumerTask::Poll).await?;
        info!(queues = ?self.dispatcher.queues(), "job consumer started");
        *self.worker.lock().await = Some(worker);
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        if let Some(mut worker) = self.worker.lock().await.take() {
            worker.stop().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use gatehouse_core::JobEnvelope;
    use serde_json::json;

    use super::*;
    use crate::jobs::queue::{new_job, MemoryJobQueue};
    use crate::jobs::JobHandler;

    struct Flaky {
        failures_left: AtomicU32,
        completed: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        fn queue(&self) -> &'static str {
            "q"
        }

        async fn handle(&self, _job: &JobEnvelope) -> anyhow::Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("transient");
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures_left: AtomicU32::new(failures),
            completed: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn failed_job_is_retried_until_it_succeeds() {
        let queue = Arc::new(MemoryJobQueue::new());
        let handler = flaky(2);
        let consumer = JobConsumer::new(
            queue.clone(),
            JobDispatcher::new().with_handler(handler.clone()),
        );

        queue.push(new_job("q", "x", json!(null))).await.unwrap();
        // Fails twice, requeued each time within the same batch, then succeeds.
        assert_eq!(consumer.drain_once().await, 3);
        assert_eq!(handler.completed.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn job_dropped_after_max_attempts() {
        let queue = Arc::new(MemoryJobQueue::new());
        let handler = flaky(10);
        let consumer = JobConsumer::new(
            queue.clone(),
            JobDispatcher::new().with_handler(handler.clone()),
        );

        queue.push(new_job("q", "x", json!(null))).await.unwrap();
        assert_eq!(consumer.drain_once().await, MAX_JOB_ATTEMPTS as usize);
        assert_eq!(handler.completed.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn service_consumes_in_background() {
        let queue = Arc::new(MemoryJobQueue::new());
        let handler = flaky(0);
        let service = QueueConsumerService::new(
            queue.clone(),
            JobDispatcher::new().with_handler(handler.clone()),
        )
        .with_poll_interval(Duration::from_millis(10));

        let config = gatehouse_core::AppConfig::resolve(gatehouse_core::RawConfig {
            role: Some("worker".to_string()),
            cors_origin: Some("http://localhost:5173".to_string()),
            auth_secret: Some("secret".to_string()),
            admin_gate: Some(false),
            ..gatehouse_core::RawConfig::default()
        })
        .unwrap();
        let ctx = ServiceContext {
            config: Arc::new(config),
        };
        service.init(&ctx).await.unwrap();
        assert!(service.is_running().await);

        queue.push(new_job("q", "x", json!(null))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.completed.load(Ordering::SeqCst), 1);

        service.shutdown(false).await.unwrap();
        assert!(!service.is_running().await);
    }
}

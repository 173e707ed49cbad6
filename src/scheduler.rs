//! Queue connection manager: the single point of contact with the broker.
//!
//! A `QueueScheduler` owns its broker connection for its scope — created
//! connected, unusable after `close()` — and tracks which queues it has
//! enqueued into so `clear()` can empty exactly those. Worker strategy is
//! fixed at construction: blocking for production workers, drain-and-exit
//! for tests and health probes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

pub use crate::broker::PurgeState;
pub use crate::worker::WorkerMode;

use crate::broker::Broker;
use crate::config::QueueConfig;
use crate::cron::{CronRegistration, next_cron_fire};
use crate::error::{BrokerError, Result, SubmissionError};
use crate::job::{Job, JobHandle};
use crate::registry::HandlerRegistry;
use crate::worker::{WorkerContext, WorkerStrategy, strategy_for};

pub struct QueueScheduler {
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    strategy: Box<dyn WorkerStrategy>,
    poll_interval: Duration,
    cron_tick_interval: Duration,
    /// Queues this instance has enqueued into, for `clear()`.
    touched: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl QueueScheduler {
    /// Create a scheduler bound to an open broker connection.
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<HandlerRegistry>, mode: WorkerMode) -> Self {
        let config = QueueConfig::default();
        Self::with_config(broker, registry, mode, &config)
    }

    pub fn with_config(
        broker: Arc<dyn Broker>,
        registry: Arc<HandlerRegistry>,
        mode: WorkerMode,
        config: &QueueConfig,
    ) -> Self {
        Self {
            broker,
            registry,
            strategy: strategy_for(mode),
            poll_interval: config.poll_interval,
            cron_tick_interval: config.cron_tick_interval,
            touched: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed.into());
        }
        Ok(())
    }

    async fn validate(&self, job: &Job) -> Result<()> {
        if job.queue.is_empty() {
            return Err(SubmissionError::EmptyQueueName.into());
        }
        if !self.registry.has(&job.handler).await {
            return Err(SubmissionError::UnknownHandler {
                name: job.handler.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn touch(&self, queue: &str) {
        let mut touched = self.touched.lock().await;
        if !touched.iter().any(|q| q == queue) {
            touched.push(queue.to_string());
        }
    }

    /// Make a job visible to any worker polling its queue. Never blocks
    /// on execution.
    pub async fn enqueue(&self, job: Job) -> Result<JobHandle> {
        self.check_open()?;
        self.validate(&job).await?;
        self.touch(&job.queue).await;
        let handle = job.handle();
        tracing::info!(
            job_id = %job.id,
            handler = %job.handler,
            queue = %job.queue,
            "Enqueued job"
        );
        self.broker.push(job).await?;
        Ok(handle)
    }

    /// Enqueue a job that becomes visible only after `delay` has elapsed.
    pub async fn enqueue_in(&self, delay: Duration, job: Job) -> Result<JobHandle> {
        self.check_open()?;
        self.validate(&job).await?;
        self.touch(&job.queue).await;
        let run_at = chrono::Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        let handle = job.handle();
        tracing::info!(
            job_id = %job.id,
            handler = %job.handler,
            queue = %job.queue,
            run_at = %run_at,
            "Enqueued delayed job"
        );
        self.broker.push_scheduled(job, run_at).await?;
        Ok(handle)
    }

    /// Register a recurring firing; each occurrence enqueues a fresh
    /// immediate job.
    #[allow(clippy::too_many_arguments)]
    pub async fn cron(
        &self,
        queue: &str,
        expression: &str,
        handler: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        description: Option<String>,
        use_local_timezone: bool,
    ) -> Result<JobHandle> {
        self.check_open()?;
        if queue.is_empty() {
            return Err(SubmissionError::EmptyQueueName.into());
        }
        if !self.registry.has(handler).await {
            return Err(SubmissionError::UnknownHandler {
                name: handler.to_string(),
            }
            .into());
        }

        let registration = CronRegistration {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            handler: handler.to_string(),
            args,
            kwargs,
            cron_string: expression.to_string(),
            description,
            use_local_timezone,
            next_run_at: next_cron_fire(expression, use_local_timezone)?,
        };
        self.broker.register_cron(&registration).await?;
        self.touch(queue).await;
        tracing::info!(
            handler = %registration.handler,
            queue = %queue,
            cron = %expression,
            next_run_at = %registration.next_run_at,
            "Registered cron job"
        );
        Ok(cron_handle(&registration))
    }

    /// Bulk-remove every cron registration known to this broker. The
    /// idempotent bootstrap primitive: cancel, then re-register the full
    /// table, so repeated restarts never duplicate recurring jobs.
    pub async fn cancel_cron_jobs(&self) -> Result<usize> {
        self.check_open()?;
        let removed = self.broker.cancel_all_cron().await?;
        tracing::info!(removed, "Cancelled all cron jobs");
        Ok(removed)
    }

    /// Read-only listing of cron registrations, for verifying bootstrap.
    pub async fn scheduled_jobs(&self) -> Result<Vec<JobHandle>> {
        self.check_open()?;
        let registrations = self.broker.list_cron().await?;
        Ok(registrations.iter().map(cron_handle).collect())
    }

    /// Run this scheduler's worker strategy against the named queues, in
    /// the priority order given. With `with_scheduler`, the cron firing
    /// loop runs co-located with the worker.
    pub async fn work(&self, queues: &[&str], with_scheduler: bool) -> Result<()> {
        self.check_open()?;
        let ctx = WorkerContext {
            broker: self.broker.clone(),
            registry: self.registry.clone(),
            poll_interval: self.poll_interval,
            cron_tick_interval: self.cron_tick_interval,
        };
        let queues: Vec<String> = queues.iter().map(|q| q.to_string()).collect();
        self.strategy
            .process_queues(&ctx, &queues, with_scheduler)
            .await?;
        Ok(())
    }

    /// Remove all jobs in the given state from one queue. Best-effort.
    pub async fn purge(&self, queue: &str, state: PurgeState) -> Result<usize> {
        self.check_open()?;
        let removed = self.broker.purge(queue, state).await?;
        tracing::info!(queue = %queue, state = %state, removed, "Purged queue");
        Ok(removed)
    }

    /// Empty every queue this instance has enqueued into. Not a global
    /// broker flush.
    pub async fn clear(&self) -> Result<()> {
        self.check_open()?;
        let touched = self.touched.lock().await.clone();
        for queue in touched {
            self.broker.clear_queue(&queue).await?;
        }
        Ok(())
    }

    /// Fetch a job back by id, in whatever state the broker holds it.
    pub async fn job(&self, id: Uuid) -> Result<Option<Job>> {
        self.check_open()?;
        Ok(self.broker.fetch(id).await?)
    }

    pub async fn queued_count(&self, queue: &str) -> Result<usize> {
        self.check_open()?;
        Ok(self.broker.queued_count(queue).await?)
    }

    pub async fn failed_count(&self, queue: &str) -> Result<usize> {
        self.check_open()?;
        Ok(self.broker.failed_count(queue).await?)
    }

    pub async fn scheduled_count(&self, queue: &str) -> Result<usize> {
        self.check_open()?;
        Ok(self.broker.scheduled_count(queue).await?)
    }

    /// Release the broker connection. Every operation afterwards returns
    /// `BrokerError::Closed`. Idempotent; dropping the scheduler also
    /// releases the connection.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.broker.close().await?;
        Ok(())
    }
}

fn cron_handle(registration: &CronRegistration) -> JobHandle {
    let mut meta = Map::new();
    meta.insert(
        "cron_string".to_string(),
        Value::from(registration.cron_string.clone()),
    );
    meta.insert(
        "use_local_timezone".to_string(),
        Value::from(registration.use_local_timezone),
    );
    JobHandle {
        id: registration.id,
        retries_left: None,
        retry_intervals: None,
        description: registration.description.clone(),
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::cron::EVERY_MINUTE;
    use crate::registry::{JobHandler, JobOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct SpyHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for SpyHandler {
        fn name(&self) -> &str {
            "spy"
        }

        async fn run(&self, _args: &[Value], _kwargs: &Map<String, Value>) -> JobOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            JobOutcome::Success
        }
    }

    async fn scheduler() -> (QueueScheduler, Arc<SpyHandler>) {
        let handler = Arc::new(SpyHandler {
            calls: AtomicU32::new(0),
        });
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(handler.clone()).await;
        let scheduler = QueueScheduler::new(
            Arc::new(MemoryBroker::new()),
            registry,
            WorkerMode::Burst,
        );
        (scheduler, handler)
    }

    #[tokio::test]
    async fn enqueue_then_work_runs_the_handler() {
        let (scheduler, handler) = scheduler().await;
        scheduler.enqueue(Job::new("q", "spy")).await.unwrap();
        scheduler.work(&["q"], false).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn work_ignores_other_queues() {
        let (scheduler, handler) = scheduler().await;
        scheduler
            .enqueue(Job::new("dead-letter", "spy"))
            .await
            .unwrap();
        scheduler.work(&["not-dead-letter"], false).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_empties_every_touched_queue() {
        let (scheduler, handler) = scheduler().await;
        for queue in ["dead-letter", "111", "222"] {
            scheduler.enqueue(Job::new(queue, "spy")).await.unwrap();
        }

        scheduler.clear().await.unwrap();
        for queue in ["dead-letter", "111", "222"] {
            scheduler.work(&[queue], false).await.unwrap();
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn enqueue_rejects_unknown_handler() {
        let (scheduler, _) = scheduler().await;
        let result = scheduler.enqueue(Job::new("q", "ghost")).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Submission(
                SubmissionError::UnknownHandler { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_queue_name() {
        let (scheduler, _) = scheduler().await;
        let result = scheduler.enqueue(Job::new("", "spy")).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Submission(
                SubmissionError::EmptyQueueName
            ))
        ));
    }

    #[tokio::test]
    async fn cron_bootstrap_is_idempotent() {
        let (scheduler, _) = scheduler().await;

        for _ in 0..3 {
            scheduler.cancel_cron_jobs().await.unwrap();
            scheduler
                .cron(
                    "short-running",
                    EVERY_MINUTE,
                    "spy",
                    Vec::new(),
                    Map::new(),
                    Some("heartbeat".to_string()),
                    false,
                )
                .await
                .unwrap();
            scheduler
                .cron(
                    "long-running",
                    "0 2 * * *",
                    "spy",
                    Vec::new(),
                    Map::new(),
                    Some("nightly sweep".to_string()),
                    false,
                )
                .await
                .unwrap();
        }

        let jobs = scheduler.scheduled_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[tokio::test]
    async fn cron_handle_carries_expression_in_meta() {
        let (scheduler, _) = scheduler().await;
        let handle = scheduler
            .cron(
                "cron-schedule",
                EVERY_MINUTE,
                "spy",
                Vec::new(),
                Map::new(),
                Some("Test cron every minute".to_string()),
                false,
            )
            .await
            .unwrap();

        assert_eq!(handle.meta_str("cron_string"), Some(EVERY_MINUTE));
        assert_eq!(
            handle.meta.get("use_local_timezone"),
            Some(&Value::from(false))
        );
        assert_eq!(handle.description.as_deref(), Some("Test cron every minute"));
    }

    #[tokio::test]
    async fn operations_fail_after_close() {
        let (scheduler, _) = scheduler().await;
        scheduler.close().await.unwrap();
        let result = scheduler.enqueue(Job::new("q", "spy")).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Broker(BrokerError::Closed))
        ));
        // close() is idempotent.
        scheduler.close().await.unwrap();
    }

    #[tokio::test]
    async fn purge_failed_only_touches_failed_state() {
        struct FailingHandler;
        #[async_trait]
        impl JobHandler for FailingHandler {
            fn name(&self) -> &str {
                "failing"
            }
            async fn run(&self, _args: &[Value], _kwargs: &Map<String, Value>) -> JobOutcome {
                JobOutcome::Fatal("spanner in the works".to_string())
            }
        }
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(Arc::new(FailingHandler)).await;

        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let scheduler = QueueScheduler::new(broker, registry, WorkerMode::Burst);

        scheduler
            .enqueue(Job::new("will-fail", "failing"))
            .await
            .unwrap();
        scheduler.enqueue(Job::new("will-fail", "failing")).await.unwrap();
        scheduler.work(&["will-fail"], false).await.unwrap();
        assert_eq!(scheduler.failed_count("will-fail").await.unwrap(), 2);

        // A still-queued job in the same queue survives the failed purge.
        scheduler.enqueue(Job::new("will-fail", "failing")).await.unwrap();
        let removed = scheduler.purge("will-fail", PurgeState::Failed).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(scheduler.failed_count("will-fail").await.unwrap(), 0);
        assert_eq!(scheduler.queued_count("will-fail").await.unwrap(), 1);
    }
}

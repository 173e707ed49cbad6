//! Worker strategies: how a process pulls and executes queued jobs.
//!
//! Both strategies apply the job's timeout and retry policy identically;
//! the only difference is whether the loop terminates once the named
//! queues are drained or runs until the process is killed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::broker::Broker;
use crate::cron::CronCoordinator;
use crate::error::BrokerError;
use crate::job::{Job, JobStatus};
use crate::registry::{HandlerRegistry, JobOutcome};

/// Execution mode selected when a scheduler is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Continuous fetch-execute loop; production workers.
    Blocking,
    /// Process currently-visible jobs once, then return; tests, CI smoke
    /// checks, health probes.
    Burst,
}

/// Shared dependencies for strategy execution.
#[derive(Clone)]
pub struct WorkerContext {
    pub broker: Arc<dyn Broker>,
    pub registry: Arc<HandlerRegistry>,
    /// Sleep between polls when every queue is empty (blocking mode).
    pub poll_interval: Duration,
    /// How often the co-located cron loop checks for due firings.
    pub cron_tick_interval: Duration,
}

/// Polymorphic execution mode bound to a broker connection.
#[async_trait]
pub trait WorkerStrategy: Send + Sync {
    async fn process_queues(
        &self,
        ctx: &WorkerContext,
        queues: &[String],
        with_scheduler: bool,
    ) -> Result<(), BrokerError>;
}

pub fn strategy_for(mode: WorkerMode) -> Box<dyn WorkerStrategy> {
    match mode {
        WorkerMode::Blocking => Box::new(BlockingWorker),
        WorkerMode::Burst => Box::new(DrainAndExitWorker),
    }
}

/// Runs an unbounded fetch-execute loop until the process is terminated.
pub struct BlockingWorker;

#[async_trait]
impl WorkerStrategy for BlockingWorker {
    async fn process_queues(
        &self,
        ctx: &WorkerContext,
        queues: &[String],
        with_scheduler: bool,
    ) -> Result<(), BrokerError> {
        tracing::info!(queues = ?queues, with_scheduler, "Worker started (blocking)");
        let mut last_cron_tick = Utc::now() - chrono::Duration::days(1);

        loop {
            if with_scheduler {
                let elapsed = Utc::now().signed_duration_since(last_cron_tick);
                if elapsed.num_seconds() >= ctx.cron_tick_interval.as_secs() as i64 {
                    CronCoordinator::fire_due(&ctx.broker).await?;
                    last_cron_tick = Utc::now();
                }
            }

            ctx.broker.promote_due(queues).await?;
            match ctx.broker.pop(queues).await? {
                Some(job) => execute_job(ctx, job).await?,
                None => tokio::time::sleep(ctx.poll_interval).await,
            }
        }
    }
}

/// Processes every job currently visible on the named queues exactly
/// once, then returns control to the caller. Never hangs on an empty
/// queue.
pub struct DrainAndExitWorker;

#[async_trait]
impl WorkerStrategy for DrainAndExitWorker {
    async fn process_queues(
        &self,
        ctx: &WorkerContext,
        queues: &[String],
        with_scheduler: bool,
    ) -> Result<(), BrokerError> {
        if with_scheduler {
            CronCoordinator::fire_due(&ctx.broker).await?;
        }

        // Promote once up front: jobs a failing handler re-schedules
        // during this drain wait for the next work() call, so a
        // zero-interval retry loop cannot wedge a burst probe.
        ctx.broker.promote_due(queues).await?;

        let mut processed = 0;
        while let Some(job) = ctx.broker.pop(queues).await? {
            execute_job(ctx, job).await?;
            processed += 1;
        }

        tracing::debug!(queues = ?queues, processed, "Drained queues");
        Ok(())
    }
}

/// Execute one job: resolve its handler, run it under the job timeout,
/// then settle the outcome against the retry policy.
async fn execute_job(ctx: &WorkerContext, mut job: Job) -> Result<(), BrokerError> {
    job.status = JobStatus::Running;
    ctx.broker.update(&job).await?;

    let outcome = match ctx.registry.get(&job.handler).await {
        Some(handler) => {
            match tokio::time::timeout(job.timeout(), handler.run(&job.args, &job.kwargs)).await {
                Ok(outcome) => outcome,
                Err(_) => JobOutcome::Retry(format!(
                    "handler timed out after {}s",
                    job.timeout_secs
                )),
            }
        }
        None => JobOutcome::Fatal(format!("handler '{}' is not registered", job.handler)),
    };

    match outcome {
        JobOutcome::Success => {
            tracing::info!(job_id = %job.id, handler = %job.handler, "Job succeeded");
            // A succeeded job has nothing left to inspect; drop the body so
            // successful runs do not accumulate in the store.
            ctx.broker.delete(job.id).await?;
        }
        JobOutcome::Retry(reason) => {
            if job.has_retries_left() {
                reschedule_retry(ctx, job, reason).await?;
            } else {
                fail_job(ctx, job, reason).await?;
            }
        }
        JobOutcome::Fatal(reason) => fail_job(ctx, job, reason).await?,
    }

    Ok(())
}

/// Park the job in the scheduled set for its next retry interval. The
/// broker re-surfaces it; the worker never sleeps a retry out.
async fn reschedule_retry(
    ctx: &WorkerContext,
    mut job: Job,
    reason: String,
) -> Result<(), BrokerError> {
    let interval = job.next_retry_interval();
    job.attempts += 1;
    job.retries_left = job.retries_left.map(|left| left.saturating_sub(1));
    job.failure_reason = Some(reason.clone());
    let run_at = Utc::now() + chrono::Duration::seconds(i64::from(interval));

    tracing::warn!(
        job_id = %job.id,
        handler = %job.handler,
        retries_left = ?job.retries_left,
        interval_secs = interval,
        "Job failed, scheduling retry: {}", reason
    );
    ctx.broker.push_scheduled(job, run_at).await
}

async fn fail_job(ctx: &WorkerContext, mut job: Job, reason: String) -> Result<(), BrokerError> {
    job.status = JobStatus::Failed;
    job.failure_reason = Some(reason.clone());
    tracing::error!(
        job_id = %job.id,
        handler = %job.handler,
        attempts = job.attempts,
        "Job failed permanently: {}", reason
    );
    ctx.broker.mark_failed(&job).await
}

//! Job submission API: the single entry point callers use to submit work.
//!
//! Validates scheduling directives, resolves the retry policy, then
//! delegates to a scoped `QueueScheduler` — cron registration for
//! recurring jobs, the scheduled set for delayed ones, a plain enqueue
//! otherwise. Execution-time failures never propagate back to the
//! submitter; once the handle is returned the job belongs to the broker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::broker::Broker;
use crate::config::{DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES, SHORT_RUNNING_QUEUE};
use crate::error::{Result, SubmissionError};
use crate::job::{Job, JobHandle, RetryPolicy};
use crate::registry::HandlerRegistry;
use crate::retry::{RetryBackoff, RetrySpec, resolve_retry_intervals};
use crate::scheduler::{QueueScheduler, WorkerMode};

/// A job submission. Defaults: three retries with flat zero-second
/// intervals, the short-running queue, a 180 second timeout, immediate
/// scheduling.
#[derive(Debug, Clone)]
pub struct JobRequest {
    handler: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    max_retries: Option<u32>,
    queue_name: String,
    is_burst: bool,
    retry_backoff: RetryBackoff,
    retry_intervals: RetrySpec,
    cron: Option<String>,
    time_delta: Option<Duration>,
    job_timeout: Duration,
    description: Option<String>,
}

impl JobRequest {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            max_retries: Some(DEFAULT_MAX_RETRIES),
            queue_name: SHORT_RUNNING_QUEUE.to_string(),
            is_burst: false,
            retry_backoff: RetryBackoff::Off,
            retry_intervals: RetrySpec::default(),
            cron: None,
            time_delta: None,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            description: None,
        }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Disable retries entirely; the job carries no retry policy.
    pub fn no_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    pub fn queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// Select the drain-and-exit strategy for the scoped scheduler this
    /// submission runs through. Submission only enqueues — the caller
    /// drives the drain with its own `work()` call afterwards — so this
    /// declares how the job is meant to be consumed rather than changing
    /// anything at submit time.
    pub fn burst(mut self, is_burst: bool) -> Self {
        self.is_burst = is_burst;
        self
    }

    pub fn retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn retry_intervals(mut self, intervals: RetrySpec) -> Self {
        self.retry_intervals = intervals;
        self
    }

    /// Fire on a recurring 5-field cron schedule. Mutually exclusive
    /// with `time_delta`.
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.cron = Some(expression.into());
        self
    }

    /// Delay first visibility by this much. Mutually exclusive with
    /// `cron`.
    pub fn time_delta(mut self, delay: Duration) -> Self {
        self.time_delta = Some(delay);
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        let max = self.max_retries?;
        let intervals =
            resolve_retry_intervals(max, self.retry_intervals.clone(), self.retry_backoff);
        Some(RetryPolicy::new(max, intervals))
    }
}

/// Submit a job for execution.
///
/// Fails fast — before touching the broker — when both `cron` and
/// `time_delta` are set or the handler is not registered. On success the
/// returned handle echoes the resolved retry policy; it is not a live
/// reference to the job.
pub async fn submit_job(
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    request: JobRequest,
) -> Result<JobHandle> {
    if request.cron.is_some() && request.time_delta.is_some() {
        return Err(SubmissionError::ConflictingSchedule.into());
    }
    if !registry.has(&request.handler).await {
        return Err(SubmissionError::UnknownHandler {
            name: request.handler.clone(),
        }
        .into());
    }

    let policy = request.retry_policy();
    tracing::info!(
        handler = %request.handler,
        queue = %request.queue_name,
        retries = ?request.max_retries,
        retry_intervals = ?policy.as_ref().map(|p| &p.intervals),
        cron = ?request.cron,
        time_delta = ?request.time_delta,
        "Submitting job"
    );

    // Scoped connection: the scheduler lives for this submission only and
    // releases its broker reference on every exit path when dropped.
    let mode = if request.is_burst {
        WorkerMode::Burst
    } else {
        WorkerMode::Blocking
    };
    let scheduler = QueueScheduler::new(broker, registry, mode);

    if let Some(expression) = &request.cron {
        return scheduler
            .cron(
                &request.queue_name,
                expression,
                &request.handler,
                request.args.clone(),
                request.kwargs.clone(),
                request.description.clone(),
                false,
            )
            .await;
    }

    let mut job = Job::new(request.queue_name.clone(), request.handler.clone())
        .with_args(request.args.clone(), request.kwargs.clone())
        .with_timeout(request.job_timeout)
        .with_description(request.description.clone());
    if let Some(policy) = policy {
        job = job.with_retry(policy);
    }

    match request.time_delta {
        Some(delay) => scheduler.enqueue_in(delay, job).await,
        None => scheduler.enqueue(job).await,
    }
}

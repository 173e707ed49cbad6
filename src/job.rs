//! Job data model: the unit of scheduled work and its lifecycle status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::DEFAULT_JOB_TIMEOUT;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Visible on a queue, waiting for a worker.
    Queued,
    /// Currently being executed by a worker.
    Running,
    /// Handler returned successfully.
    Succeeded,
    /// Retries exhausted (or failure was fatal); inspectable and purgeable.
    Failed,
    /// Parked with a fire-at time: either delayed at submission or waiting
    /// out a retry interval.
    Scheduled,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Retry policy attached to a job at submission time.
///
/// `intervals` holds either a single delay repeated for every retry, or
/// one delay per retry. Delays are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max: u32,
    pub intervals: Vec<u32>,
}

impl RetryPolicy {
    pub fn new(max: u32, intervals: Vec<u32>) -> Self {
        Self { max, intervals }
    }

    /// Delay before the given retry (zero-based). A one-element list
    /// repeats; a per-retry list sticks on its last entry once exhausted.
    pub fn interval_for(&self, retry: u32) -> u32 {
        match self.intervals.len() {
            0 => 0,
            len => {
                let idx = (retry as usize).min(len - 1);
                self.intervals[idx]
            }
        }
    }
}

/// One unit of scheduled work.
///
/// Carries a registered handler name rather than a function reference, so
/// any worker process can resolve and execute it (see `HandlerRegistry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    /// Stable name of a registered handler.
    pub handler: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// Retries remaining. `None` means the job is never retried.
    pub retries_left: Option<u32>,
    /// Delay intervals in seconds; `None` when no retry policy is set.
    pub retry_intervals: Option<Vec<u32>>,
    /// How many times this job has already been retried.
    pub attempts: u32,
    /// Hard execution timeout in seconds.
    pub timeout_secs: u64,
    pub status: JobStatus,
    pub description: Option<String>,
    /// Free-form metadata for observability (`cron_string` etc.).
    pub meta: Map<String, Value>,
    pub enqueued_at: DateTime<Utc>,
    /// Fire-at time while the job sits in the scheduled set.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Reason recorded for the most recent failure, if any.
    pub failure_reason: Option<String>,
}

impl Job {
    /// Build an immediately-runnable job with no retry policy.
    pub fn new(queue: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            handler: handler.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            retries_left: None,
            retry_intervals: None,
            attempts: 0,
            timeout_secs: DEFAULT_JOB_TIMEOUT.as_secs(),
            status: JobStatus::Queued,
            description: None,
            meta: Map::new(),
            enqueued_at: Utc::now(),
            scheduled_at: None,
            failure_reason: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        self.args = args;
        self.kwargs = kwargs;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retries_left = Some(policy.max);
        self.retry_intervals = Some(policy.intervals);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether a failure right now would be retried rather than marked dead.
    pub fn has_retries_left(&self) -> bool {
        self.retries_left.is_some_and(|left| left > 0)
    }

    /// Delay in seconds before the next retry, per the attached intervals.
    pub fn next_retry_interval(&self) -> u32 {
        match &self.retry_intervals {
            Some(intervals) if !intervals.is_empty() => {
                let idx = (self.attempts as usize).min(intervals.len() - 1);
                intervals[idx]
            }
            _ => 0,
        }
    }

    /// Lightweight handle returned to the submitter.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            retries_left: self.retries_left,
            retry_intervals: self.retry_intervals.clone(),
            description: self.description.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// Handle echoed back to the submitting process. The job itself is owned
/// by the broker once enqueued; this is for logging and tests only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub retries_left: Option<u32>,
    pub retry_intervals: Option<Vec<u32>>,
    pub description: Option<String>,
    pub meta: Map<String, Value>,
}

impl JobHandle {
    /// Convenience accessor for string-valued metadata entries.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_has_defaults() {
        let job = Job::new("short-running", "noop");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.timeout_secs, 180);
        assert!(job.retries_left.is_none());
        assert!(!job.has_retries_left());
    }

    #[test]
    fn retry_policy_single_interval_repeats() {
        let policy = RetryPolicy::new(3, vec![30]);
        assert_eq!(policy.interval_for(0), 30);
        assert_eq!(policy.interval_for(2), 30);
    }

    #[test]
    fn retry_policy_per_retry_intervals() {
        let policy = RetryPolicy::new(3, vec![1, 4, 9]);
        assert_eq!(policy.interval_for(0), 1);
        assert_eq!(policy.interval_for(1), 4);
        assert_eq!(policy.interval_for(2), 9);
        // Past the end the last entry holds.
        assert_eq!(policy.interval_for(5), 9);
    }

    #[test]
    fn next_retry_interval_follows_attempts() {
        let mut job = Job::new("q", "noop").with_retry(RetryPolicy::new(2, vec![1, 4]));
        assert_eq!(job.next_retry_interval(), 1);
        job.attempts = 1;
        assert_eq!(job.next_retry_interval(), 4);
    }

    #[test]
    fn status_round_trips_through_serde() {
        let json = serde_json::to_string(&JobStatus::Scheduled).unwrap();
        assert_eq!(json, "\"scheduled\"");
        let status: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, JobStatus::Scheduled);
    }

    #[test]
    fn handle_echoes_retry_policy() {
        let job = Job::new("q", "noop").with_retry(RetryPolicy::new(3, vec![1, 2]));
        let handle = job.handle();
        assert_eq!(handle.retries_left, Some(3));
        assert_eq!(handle.retry_intervals, Some(vec![1, 2]));
    }
}

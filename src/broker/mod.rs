//! The durable broker contract and its implementations.
//!
//! The core does not mandate a broker; it specifies the operations a
//! broker must uphold — named FIFO queues, a scheduled set that
//! re-surfaces jobs after a delay, a failed-job registry, and a cron
//! table. `RedisBroker` is the production implementation; `MemoryBroker`
//! backs the test suite and synchronous burst probes.

mod memory;
mod redis;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cron::CronRegistration;
use crate::error::{BrokerError, SubmissionError};
use crate::job::Job;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;

/// Job state targeted by a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeState {
    Queued,
    Failed,
    Scheduled,
}

impl std::fmt::Display for PurgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PurgeState::Queued => "queued",
            PurgeState::Failed => "failed",
            PurgeState::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

impl FromStr for PurgeState {
    type Err = SubmissionError;

    /// Only the externally purgeable states parse; the scheduled set is
    /// managed by the retry and delay machinery, not the CLI.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(PurgeState::Queued),
            "failed" => Ok(PurgeState::Failed),
            other => Err(SubmissionError::InvalidQueueState {
                state: other.to_string(),
            }),
        }
    }
}

/// A durable, pollable message broker.
///
/// Implementations guarantee FIFO order within a queue and durability of
/// accepted jobs; they make no delivery guarantee stronger than
/// at-least-once.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make a job visible to workers polling its queue.
    async fn push(&self, job: Job) -> Result<(), BrokerError>;

    /// Park a job until `run_at`; `promote_due` moves it to its queue
    /// once the time has passed.
    async fn push_scheduled(&self, job: Job, run_at: DateTime<Utc>) -> Result<(), BrokerError>;

    /// Move every due scheduled job on the named queues back onto its
    /// queue. Returns how many were promoted.
    async fn promote_due(&self, queues: &[String]) -> Result<usize, BrokerError>;

    /// Pop the next job, checking queues in the order given. Never blocks.
    async fn pop(&self, queues: &[String]) -> Result<Option<Job>, BrokerError>;

    /// Fetch a job body by id.
    async fn fetch(&self, id: Uuid) -> Result<Option<Job>, BrokerError>;

    /// Persist an updated job body (status transitions etc.).
    async fn update(&self, job: &Job) -> Result<(), BrokerError>;

    /// Record a job in its queue's failed registry and persist its body.
    async fn mark_failed(&self, job: &Job) -> Result<(), BrokerError>;

    /// Remove a job body outright. Called when a job reaches the end of
    /// its lifecycle with nothing left to inspect, so successful runs do
    /// not accumulate in the store.
    async fn delete(&self, id: Uuid) -> Result<(), BrokerError>;

    async fn queued_count(&self, queue: &str) -> Result<usize, BrokerError>;
    async fn failed_count(&self, queue: &str) -> Result<usize, BrokerError>;
    async fn scheduled_count(&self, queue: &str) -> Result<usize, BrokerError>;

    /// Remove all jobs in `state` from the named queue. Best-effort: a
    /// failure part-way leaves earlier removals in place.
    async fn purge(&self, queue: &str, state: PurgeState) -> Result<usize, BrokerError>;

    /// Empty the ready list of one queue.
    async fn clear_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Insert or update a cron registration.
    async fn register_cron(&self, registration: &CronRegistration) -> Result<(), BrokerError>;

    /// Remove a single cron registration.
    async fn remove_cron(&self, id: Uuid) -> Result<(), BrokerError>;

    /// Remove every cron registration. Returns how many were removed.
    async fn cancel_all_cron(&self) -> Result<usize, BrokerError>;

    async fn list_cron(&self) -> Result<Vec<CronRegistration>, BrokerError>;

    /// Release the underlying connection. Idempotent.
    async fn close(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_state_parses_allowed_values() {
        assert_eq!("queued".parse::<PurgeState>().unwrap(), PurgeState::Queued);
        assert_eq!("failed".parse::<PurgeState>().unwrap(), PurgeState::Failed);
    }

    #[test]
    fn purge_state_rejects_scheduled_and_garbage() {
        assert!("scheduled".parse::<PurgeState>().is_err());
        assert!("running".parse::<PurgeState>().is_err());
    }
}

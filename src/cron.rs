//! Cron coordinator: recurring job registrations and their firing loop.
//!
//! Registrations live in the broker so every worker process sees the same
//! table. The only supported update mechanism is a clean-slate reset —
//! cancel everything, re-register the full table — which keeps repeated
//! application bootstraps from duplicating recurring jobs. Each firing
//! enqueues a fresh immediate job and is independent of previous firings.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::{BrokerError, CronError};
use crate::job::{Job, JobStatus};

/// Fires at the top of every minute.
pub const EVERY_MINUTE: &str = "* * * * *";
/// Fires at the top of every hour.
pub const EVERY_HOUR: &str = "0 * * * *";

/// A recurring firing definition stored in the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronRegistration {
    pub id: Uuid,
    pub queue: String,
    pub handler: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// Standard 5-field cron expression.
    pub cron_string: String,
    pub description: Option<String>,
    /// Evaluate the expression against local time instead of UTC.
    pub use_local_timezone: bool,
    pub next_run_at: DateTime<Utc>,
}

impl CronRegistration {
    /// Build a fresh immediate job for one firing of this registration.
    pub fn to_job(&self) -> Job {
        let mut job = Job::new(self.queue.clone(), self.handler.clone())
            .with_args(self.args.clone(), self.kwargs.clone())
            .with_description(self.description.clone());
        job.meta
            .insert("cron_string".to_string(), Value::from(self.cron_string.clone()));
        job.meta.insert(
            "use_local_timezone".to_string(),
            Value::from(self.use_local_timezone),
        );
        job
    }
}

/// The `cron` crate wants a seconds field; public expressions are the
/// standard 5-field form, so prepend one. Longer forms pass through.
fn normalize_expression(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// Parse a cron expression and compute its next fire time from now.
pub fn next_cron_fire(expression: &str, use_local_timezone: bool) -> Result<DateTime<Utc>, CronError> {
    let schedule = cron::Schedule::from_str(&normalize_expression(expression)).map_err(|e| {
        CronError::InvalidExpression {
            expression: expression.to_string(),
            reason: e.to_string(),
        }
    })?;

    let next = if use_local_timezone {
        schedule.upcoming(Local).next().map(|dt| dt.with_timezone(&Utc))
    } else {
        schedule.upcoming(Utc).next()
    };

    next.ok_or_else(|| CronError::InvalidExpression {
        expression: expression.to_string(),
        reason: "expression never fires".to_string(),
    })
}

/// Drives due cron registrations; co-located with a worker when `work` is
/// called with the scheduler enabled.
pub struct CronCoordinator;

impl CronCoordinator {
    /// Enqueue a fresh job for every registration that is due, advancing
    /// its next fire time. One bad registration is logged and skipped;
    /// the rest still fire.
    pub async fn fire_due(broker: &Arc<dyn Broker>) -> Result<usize, BrokerError> {
        let now = Utc::now();
        let mut fired = 0;

        for mut registration in broker.list_cron().await? {
            if registration.next_run_at > now {
                continue;
            }

            let mut job = registration.to_job();
            job.status = JobStatus::Queued;
            let queue = job.queue.clone();
            if let Err(e) = broker.push(job).await {
                tracing::error!(
                    handler = %registration.handler,
                    queue = %queue,
                    "Cron firing failed to enqueue: {}", e
                );
                continue;
            }

            match next_cron_fire(&registration.cron_string, registration.use_local_timezone) {
                Ok(next) => registration.next_run_at = next,
                Err(e) => {
                    // Leaving the stale due time in place would re-fire a
                    // duplicate job every tick.
                    tracing::error!(
                        handler = %registration.handler,
                        "Cron expression no longer parses, cancelling registration: {}", e
                    );
                    broker.remove_cron(registration.id).await?;
                    continue;
                }
            }
            broker.register_cron(&registration).await?;

            tracing::info!(
                handler = %registration.handler,
                queue = %queue,
                next_run_at = %registration.next_run_at,
                "Fired cron job"
            );
            fired += 1;
        }

        Ok(fired)
    }
}

/// One row of an application's fixed cron table.
#[derive(Debug, Clone)]
pub struct CronEntry {
    pub queue: String,
    pub handler: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub cron_string: String,
    pub description: Option<String>,
    pub use_local_timezone: bool,
}

impl CronEntry {
    pub fn new(
        queue: impl Into<String>,
        cron_string: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            handler: handler.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            cron_string: cron_string.into(),
            description: None,
            use_local_timezone: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Clean-slate reset of the cron table: cancel every registration, then
/// re-register the full fixed table. The only supported update mechanism
/// — no incremental diffing — so running it on every application
/// bootstrap is safe and never duplicates recurring jobs.
pub async fn reset_cron_table(
    scheduler: &crate::scheduler::QueueScheduler,
    entries: &[CronEntry],
) -> crate::error::Result<()> {
    scheduler.cancel_cron_jobs().await?;
    for entry in entries {
        scheduler
            .cron(
                &entry.queue,
                &entry.cron_string,
                &entry.handler,
                entry.args.clone(),
                entry.kwargs.clone(),
                entry.description.clone(),
                entry.use_local_timezone,
            )
            .await?;
    }
    tracing::info!(registered = entries.len(), "Cron table reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expression_gains_seconds() {
        assert_eq!(normalize_expression("* * * * *"), "0 * * * * *");
        assert_eq!(normalize_expression("0 9 * * MON-FRI"), "0 0 9 * * MON-FRI");
    }

    #[test]
    fn six_field_expression_passes_through() {
        assert_eq!(normalize_expression("*/5 * * * * *"), "*/5 * * * * *");
    }

    #[test]
    fn next_fire_for_every_minute() {
        let next = next_cron_fire(EVERY_MINUTE, false).unwrap();
        assert!(next > Utc::now());
    }

    #[test]
    fn next_fire_local_timezone() {
        let next = next_cron_fire(EVERY_HOUR, true).unwrap();
        assert!(next > Utc::now());
    }

    #[test]
    fn invalid_expression_is_rejected() {
        let result = next_cron_fire("not a cron", false);
        assert!(matches!(result, Err(CronError::InvalidExpression { .. })));
    }

    #[test]
    fn registration_builds_fresh_jobs() {
        let registration = CronRegistration {
            id: Uuid::new_v4(),
            queue: "short-running".to_string(),
            handler: "noop".to_string(),
            args: vec![Value::from("a")],
            kwargs: Map::new(),
            cron_string: EVERY_MINUTE.to_string(),
            description: Some("every minute".to_string()),
            use_local_timezone: false,
            next_run_at: Utc::now(),
        };

        let first = registration.to_job();
        let second = registration.to_job();
        assert_ne!(first.id, second.id);
        assert_eq!(first.meta.get("cron_string").unwrap(), EVERY_MINUTE);
        assert_eq!(first.args, vec![Value::from("a")]);
    }

    #[tokio::test]
    async fn fire_due_enqueues_and_advances() {
        let broker: Arc<dyn Broker> = Arc::new(crate::broker::MemoryBroker::new());
        let registration = CronRegistration {
            id: Uuid::new_v4(),
            queue: "cron-q".to_string(),
            handler: "noop".to_string(),
            args: Vec::new(),
            kwargs: Map::new(),
            cron_string: EVERY_MINUTE.to_string(),
            description: None,
            use_local_timezone: false,
            next_run_at: Utc::now() - chrono::Duration::seconds(5),
        };
        broker.register_cron(&registration).await.unwrap();

        let fired = CronCoordinator::fire_due(&broker).await.unwrap();
        assert_eq!(fired, 1);
        assert_eq!(broker.queued_count("cron-q").await.unwrap(), 1);

        let listed = broker.list_cron().await.unwrap();
        assert!(listed[0].next_run_at > Utc::now());

        // Nothing further is due, so a second pass fires nothing.
        assert_eq!(CronCoordinator::fire_due(&broker).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unparseable_registration_fires_once_then_is_cancelled() {
        let broker: Arc<dyn Broker> = Arc::new(crate::broker::MemoryBroker::new());
        let registration = CronRegistration {
            id: Uuid::new_v4(),
            queue: "cron-q".to_string(),
            handler: "noop".to_string(),
            args: Vec::new(),
            kwargs: Map::new(),
            cron_string: "not a cron".to_string(),
            description: None,
            use_local_timezone: false,
            next_run_at: Utc::now() - chrono::Duration::seconds(5),
        };
        broker.register_cron(&registration).await.unwrap();

        CronCoordinator::fire_due(&broker).await.unwrap();
        assert_eq!(broker.queued_count("cron-q").await.unwrap(), 1);
        assert!(broker.list_cron().await.unwrap().is_empty());

        // The stale due time is gone with the registration, so later ticks
        // cannot duplicate the job.
        assert_eq!(CronCoordinator::fire_due(&broker).await.unwrap(), 0);
        assert_eq!(broker.queued_count("cron-q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fire_due_skips_future_registrations() {
        let broker: Arc<dyn Broker> = Arc::new(crate::broker::MemoryBroker::new());
        let registration = CronRegistration {
            id: Uuid::new_v4(),
            queue: "cron-q".to_string(),
            handler: "noop".to_string(),
            args: Vec::new(),
            kwargs: Map::new(),
            cron_string: EVERY_MINUTE.to_string(),
            description: None,
            use_local_timezone: false,
            next_run_at: Utc::now() + chrono::Duration::hours(1),
        };
        broker.register_cron(&registration).await.unwrap();

        assert_eq!(CronCoordinator::fire_due(&broker).await.unwrap(), 0);
        assert_eq!(broker.queued_count("cron-q").await.unwrap(), 0);
    }
}

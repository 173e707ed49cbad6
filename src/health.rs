//! Broker liveness probe.
//!
//! A handler with no side effects beyond a log line, enqueued on a
//! dedicated test queue. Scheduled periodically via the cron path, and
//! runnable synchronously under drain-and-exit to assert end-to-end
//! broker liveness (enqueue → poll → execute).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::broker::Broker;
use crate::config::HEALTH_CHECK_QUEUE;
use crate::error::Result;
use crate::job::Job;
use crate::registry::{HandlerRegistry, JobHandler, JobOutcome};
use crate::scheduler::{QueueScheduler, WorkerMode};

pub const HEALTH_CHECK_HANDLER: &str = "queue_health_check";

/// Logs a single line and succeeds.
pub struct HealthCheckHandler;

#[async_trait]
impl JobHandler for HealthCheckHandler {
    fn name(&self) -> &str {
        HEALTH_CHECK_HANDLER
    }

    async fn run(&self, _args: &[Value], _kwargs: &Map<String, Value>) -> JobOutcome {
        tracing::info!("Queue health check: broker round-trip OK");
        JobOutcome::Success
    }
}

/// Enqueue a health-check job and drain it synchronously. Returns only
/// once the job has actually been fetched and executed, so success means
/// the whole enqueue-poll-execute path is live.
pub async fn run_health_check(broker: Arc<dyn Broker>) -> Result<()> {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(HealthCheckHandler)).await;

    let scheduler = QueueScheduler::new(broker, registry, WorkerMode::Burst);
    scheduler
        .enqueue(Job::new(HEALTH_CHECK_QUEUE, HEALTH_CHECK_HANDLER))
        .await?;
    scheduler.work(&[HEALTH_CHECK_QUEUE], false).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    #[tokio::test]
    async fn health_check_round_trips() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        run_health_check(broker.clone()).await.unwrap();
        assert_eq!(broker.queued_count(HEALTH_CHECK_QUEUE).await.unwrap(), 0);
        assert_eq!(broker.failed_count(HEALTH_CHECK_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handler_reports_success() {
        let outcome = HealthCheckHandler.run(&[], &Map::new()).await;
        assert_eq!(outcome, JobOutcome::Success);
    }
}

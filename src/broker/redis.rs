//! Redis-backed broker.
//!
//! Layout: one list of job ids per ready queue (FIFO via RPUSH/LPOP), a
//! string key per job body, a sorted set per queue for scheduled jobs
//! (score = fire-at unix time), a list per queue for failed job ids, and
//! a single hash for cron registrations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::broker::{Broker, PurgeState};
use crate::cron::CronRegistration;
use crate::error::BrokerError;
use crate::job::{Job, JobStatus};

const KEY_PREFIX: &str = "relayq";

fn queue_key(queue: &str) -> String {
    format!("{KEY_PREFIX}:queue:{queue}")
}

fn job_key(id: Uuid) -> String {
    format!("{KEY_PREFIX}:job:{id}")
}

fn scheduled_key(queue: &str) -> String {
    format!("{KEY_PREFIX}:scheduled:{queue}")
}

fn failed_key(queue: &str) -> String {
    format!("{KEY_PREFIX}:failed:{queue}")
}

fn cron_key() -> String {
    format!("{KEY_PREFIX}:cron")
}

/// A broker backed by a single Redis connection.
#[derive(Clone)]
pub struct RedisBroker {
    connection: ConnectionManager,
    closed: Arc<AtomicBool>,
}

impl RedisBroker {
    /// Connect to the broker at the given URL.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)
            .map_err(|e| BrokerError::Connection(format!("invalid broker URL: {e}")))?;
        let connection = client.get_connection_manager().await?;
        Ok(Self {
            connection,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn conn(&self) -> Result<ConnectionManager, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(self.connection.clone())
    }

    async fn store_job(&self, job: &Job) -> Result<(), BrokerError> {
        let body = serde_json::to_string(job)?;
        let mut conn = self.conn()?;
        let _: () = conn.set(job_key(job.id), body).await?;
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<Job>, BrokerError> {
        let mut conn = self.conn()?;
        let body: Option<String> = conn.get(job_key(id)).await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn delete_jobs(&self, ids: &[String]) -> Result<(), BrokerError> {
        let mut conn = self.conn()?;
        for id in ids {
            if let Ok(id) = id.parse::<Uuid>() {
                let _: () = conn.del(job_key(id)).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, job: Job) -> Result<(), BrokerError> {
        self.store_job(&job).await?;
        let mut conn = self.conn()?;
        let _: () = conn.rpush(queue_key(&job.queue), job.id.to_string()).await?;
        Ok(())
    }

    async fn push_scheduled(&self, mut job: Job, run_at: DateTime<Utc>) -> Result<(), BrokerError> {
        job.status = JobStatus::Scheduled;
        job.scheduled_at = Some(run_at);
        self.store_job(&job).await?;
        let mut conn = self.conn()?;
        let _: () = conn
            .zadd(
                scheduled_key(&job.queue),
                job.id.to_string(),
                run_at.timestamp(),
            )
            .await?;
        Ok(())
    }

    async fn promote_due(&self, queues: &[String]) -> Result<usize, BrokerError> {
        let now = Utc::now().timestamp();
        let mut promoted = 0;

        for queue in queues {
            let mut conn = self.conn()?;
            let due: Vec<String> = conn
                .zrangebyscore(scheduled_key(queue), i64::MIN, now)
                .await?;

            for raw_id in due {
                let _: () = conn.zrem(scheduled_key(queue), raw_id.clone()).await?;
                let id = match raw_id.parse::<Uuid>() {
                    Ok(id) => id,
                    Err(_) => continue,
                };
                if let Some(mut job) = self.load_job(id).await? {
                    job.status = JobStatus::Queued;
                    job.scheduled_at = None;
                    self.store_job(&job).await?;
                }
                let _: () = conn.rpush(queue_key(queue), raw_id).await?;
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    async fn pop(&self, queues: &[String]) -> Result<Option<Job>, BrokerError> {
        let mut conn = self.conn()?;
        for queue in queues {
            let raw_id: Option<String> = conn.lpop(queue_key(queue), None).await?;
            let Some(raw_id) = raw_id else { continue };
            let Ok(id) = raw_id.parse::<Uuid>() else {
                continue;
            };
            if let Some(job) = self.load_job(id).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Job>, BrokerError> {
        self.load_job(id).await
    }

    async fn update(&self, job: &Job) -> Result<(), BrokerError> {
        self.store_job(job).await
    }

    async fn mark_failed(&self, job: &Job) -> Result<(), BrokerError> {
        self.store_job(job).await?;
        let mut conn = self.conn()?;
        let _: () = conn
            .rpush(failed_key(&job.queue), job.id.to_string())
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), BrokerError> {
        let mut conn = self.conn()?;
        let _: () = conn.del(job_key(id)).await?;
        Ok(())
    }

    async fn queued_count(&self, queue: &str) -> Result<usize, BrokerError> {
        let mut conn = self.conn()?;
        Ok(conn.llen(queue_key(queue)).await?)
    }

    async fn failed_count(&self, queue: &str) -> Result<usize, BrokerError> {
        let mut conn = self.conn()?;
        Ok(conn.llen(failed_key(queue)).await?)
    }

    async fn scheduled_count(&self, queue: &str) -> Result<usize, BrokerError> {
        let mut conn = self.conn()?;
        Ok(conn.zcard(scheduled_key(queue)).await?)
    }

    async fn purge(&self, queue: &str, state: PurgeState) -> Result<usize, BrokerError> {
        let mut conn = self.conn()?;
        let (key, ids): (String, Vec<String>) = match state {
            PurgeState::Queued => {
                let key = queue_key(queue);
                let ids: Vec<String> = conn.lrange(&key, 0, -1).await?;
                (key, ids)
            }
            PurgeState::Failed => {
                let key = failed_key(queue);
                let ids: Vec<String> = conn.lrange(&key, 0, -1).await?;
                (key, ids)
            }
            PurgeState::Scheduled => {
                let key = scheduled_key(queue);
                let ids: Vec<String> = conn.zrangebyscore(&key, i64::MIN, i64::MAX).await?;
                (key, ids)
            }
        };

        self.delete_jobs(&ids).await?;
        let _: () = conn.del(key).await?;
        Ok(ids.len())
    }

    async fn clear_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.purge(queue, PurgeState::Queued).await.map(|_| ())
    }

    async fn register_cron(&self, registration: &CronRegistration) -> Result<(), BrokerError> {
        let body = serde_json::to_string(registration)?;
        let mut conn = self.conn()?;
        let _: () = conn
            .hset(cron_key(), registration.id.to_string(), body)
            .await?;
        Ok(())
    }

    async fn remove_cron(&self, id: Uuid) -> Result<(), BrokerError> {
        let mut conn = self.conn()?;
        let _: () = conn.hdel(cron_key(), id.to_string()).await?;
        Ok(())
    }

    async fn cancel_all_cron(&self) -> Result<usize, BrokerError> {
        let mut conn = self.conn()?;
        let count: usize = conn.hlen(cron_key()).await?;
        let _: () = conn.del(cron_key()).await?;
        Ok(count)
    }

    async fn list_cron(&self) -> Result<Vec<CronRegistration>, BrokerError> {
        let mut conn = self.conn()?;
        let bodies: Vec<String> = conn.hvals(cron_key()).await?;
        let mut registrations = Vec::with_capacity(bodies.len());
        for body in bodies {
            registrations.push(serde_json::from_str(&body)?);
        }
        Ok(registrations)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        // The connection manager has no explicit shutdown; marking the
        // broker closed stops all further use and the manager is released
        // when the last clone drops.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(queue_key("short-running"), "relayq:queue:short-running");
        assert_eq!(failed_key("a"), "relayq:failed:a");
        assert_eq!(scheduled_key("a"), "relayq:scheduled:a");
        assert_eq!(cron_key(), "relayq:cron");
    }

    #[test]
    fn scheduled_score_is_epoch_seconds() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(at.timestamp(), 1767225600);
    }
}

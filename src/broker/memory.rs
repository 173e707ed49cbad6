//! In-memory broker for tests and synchronous burst probes.
//!
//! Holds the same structures the Redis layout uses — ready lists, a
//! scheduled set, failed registries, a cron table — behind one mutex, so
//! the scheduler and worker code paths are exercised unchanged.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::broker::{Broker, PurgeState};
use crate::cron::CronRegistration;
use crate::error::BrokerError;
use crate::job::{Job, JobStatus};

#[derive(Default)]
struct State {
    /// Ready jobs per queue, FIFO.
    queues: HashMap<String, VecDeque<Uuid>>,
    /// Job bodies, removed on success, purge, or clear.
    jobs: HashMap<Uuid, Job>,
    /// Parked jobs per queue with their fire-at times.
    scheduled: HashMap<String, Vec<(Uuid, DateTime<Utc>)>>,
    /// Dead/failed job ids per queue.
    failed: HashMap<String, Vec<Uuid>>,
    cron: HashMap<Uuid, CronRegistration>,
}

/// A broker backed by process-local state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, job: Job) -> Result<(), BrokerError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        state
            .queues
            .entry(job.queue.clone())
            .or_default()
            .push_back(job.id);
        state.jobs.insert(job.id, job);
        Ok(())
    }

    async fn push_scheduled(&self, mut job: Job, run_at: DateTime<Utc>) -> Result<(), BrokerError> {
        self.check_open()?;
        job.status = JobStatus::Scheduled;
        job.scheduled_at = Some(run_at);
        let mut state = self.state.lock().await;
        state
            .scheduled
            .entry(job.queue.clone())
            .or_default()
            .push((job.id, run_at));
        state.jobs.insert(job.id, job);
        Ok(())
    }

    async fn promote_due(&self, queues: &[String]) -> Result<usize, BrokerError> {
        self.check_open()?;
        let now = Utc::now();
        let mut promoted = 0;
        let mut state = self.state.lock().await;

        for queue in queues {
            let due: Vec<Uuid> = match state.scheduled.get_mut(queue) {
                Some(entries) => {
                    let (ready, waiting): (Vec<_>, Vec<_>) =
                        entries.drain(..).partition(|(_, at)| *at <= now);
                    *entries = waiting;
                    ready.into_iter().map(|(id, _)| id).collect()
                }
                None => continue,
            };

            for id in due {
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.status = JobStatus::Queued;
                    job.scheduled_at = None;
                }
                state.queues.entry(queue.clone()).or_default().push_back(id);
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    async fn pop(&self, queues: &[String]) -> Result<Option<Job>, BrokerError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        for queue in queues {
            let id = match state.queues.get_mut(queue).and_then(VecDeque::pop_front) {
                Some(id) => id,
                None => continue,
            };
            if let Some(job) = state.jobs.get(&id) {
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Job>, BrokerError> {
        self.check_open()?;
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), BrokerError> {
        self.check_open()?;
        self.state.lock().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn mark_failed(&self, job: &Job) -> Result<(), BrokerError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        state
            .failed
            .entry(job.queue.clone())
            .or_default()
            .push(job.id);
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), BrokerError> {
        self.check_open()?;
        self.state.lock().await.jobs.remove(&id);
        Ok(())
    }

    async fn queued_count(&self, queue: &str) -> Result<usize, BrokerError> {
        self.check_open()?;
        Ok(self
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len))
    }

    async fn failed_count(&self, queue: &str) -> Result<usize, BrokerError> {
        self.check_open()?;
        Ok(self.state.lock().await.failed.get(queue).map_or(0, Vec::len))
    }

    async fn scheduled_count(&self, queue: &str) -> Result<usize, BrokerError> {
        self.check_open()?;
        Ok(self
            .state
            .lock()
            .await
            .scheduled
            .get(queue)
            .map_or(0, Vec::len))
    }

    async fn purge(&self, queue: &str, state: PurgeState) -> Result<usize, BrokerError> {
        self.check_open()?;
        let mut inner = self.state.lock().await;
        let ids: Vec<Uuid> = match state {
            PurgeState::Queued => inner
                .queues
                .remove(queue)
                .map(|q| q.into_iter().collect())
                .unwrap_or_default(),
            PurgeState::Failed => inner.failed.remove(queue).unwrap_or_default(),
            PurgeState::Scheduled => inner
                .scheduled
                .remove(queue)
                .map(|entries| entries.into_iter().map(|(id, _)| id).collect())
                .unwrap_or_default(),
        };
        for id in &ids {
            inner.jobs.remove(id);
        }
        Ok(ids.len())
    }

    async fn clear_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.purge(queue, PurgeState::Queued).await.map(|_| ())
    }

    async fn register_cron(&self, registration: &CronRegistration) -> Result<(), BrokerError> {
        self.check_open()?;
        self.state
            .lock()
            .await
            .cron
            .insert(registration.id, registration.clone());
        Ok(())
    }

    async fn remove_cron(&self, id: Uuid) -> Result<(), BrokerError> {
        self.check_open()?;
        self.state.lock().await.cron.remove(&id);
        Ok(())
    }

    async fn cancel_all_cron(&self) -> Result<usize, BrokerError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let removed = state.cron.len();
        state.cron.clear();
        Ok(removed)
    }

    async fn list_cron(&self) -> Result<Vec<CronRegistration>, BrokerError> {
        self.check_open()?;
        Ok(self.state.lock().await.cron.values().cloned().collect())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

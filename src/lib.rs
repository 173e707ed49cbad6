//! relayq — job scheduling and queue management core.
//!
//! Submits units of work to a durable, pollable broker, decides how and
//! when they run, retries them on failure with configurable backoff, and
//! supports both cron-style recurring jobs and one-off delayed jobs.
//! Workers run as independent OS processes in one of two modes: a blocking
//! fetch-execute loop, or a drain-and-exit pass used by tests and
//! health-check probes.

pub mod broker;
pub mod config;
pub mod cron;
pub mod error;
pub mod health;
pub mod job;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod submit;
pub mod worker;

pub use broker::{Broker, MemoryBroker, RedisBroker};
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use job::{Job, JobHandle, JobStatus, RetryPolicy};
pub use registry::{HandlerRegistry, JobHandler, JobOutcome};
pub use scheduler::{PurgeState, QueueScheduler, WorkerMode};
pub use submit::{JobRequest, submit_job};

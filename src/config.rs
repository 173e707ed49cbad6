//! Configuration types and fixed queue names.

use std::time::Duration;

use crate::error::ConfigError;

/// Queue for tasks expected to finish quickly.
pub const SHORT_RUNNING_QUEUE: &str = "short-running";
/// Queue for tasks that may run for minutes.
pub const LONG_RUNNING_QUEUE: &str = "long-running";
/// Prefix applied to queue names under test so test runs never touch
/// production queues.
pub const TEST_PREFIX: &str = "test-";
/// Dedicated queue for end-to-end broker liveness probes.
pub const HEALTH_CHECK_QUEUE: &str = "test-rq-health";

/// Default timeout applied to a job when the submitter does not set one.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(180);
/// Default number of retries for a submitted job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue core configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Broker connection URL (e.g. `redis://localhost:6379`).
    pub broker_url: String,
    /// Queue used when a submission names none.
    pub default_queue: String,
    /// How long a blocking worker sleeps when every polled queue is empty.
    pub poll_interval: Duration,
    /// How often a worker running the scheduler checks for due cron jobs.
    pub cron_tick_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker_url: "redis://localhost:6379".to_string(),
            default_queue: SHORT_RUNNING_QUEUE.to_string(),
            poll_interval: Duration::from_secs(1),
            cron_tick_interval: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Load configuration from the environment. `REDIS_BASE_URL` is
    /// required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let broker_url = std::env::var("REDIS_BASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("REDIS_BASE_URL".to_string()))?;

        let mut config = Self {
            broker_url,
            ..Self::default()
        };

        if let Ok(raw) = std::env::var("RELAYQ_POLL_INTERVAL_SECS") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "RELAYQ_POLL_INTERVAL_SECS".to_string(),
                message: format!("'{raw}' is not a number of seconds"),
            })?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Ok(raw) = std::env::var("RELAYQ_CRON_TICK_SECS") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "RELAYQ_CRON_TICK_SECS".to_string(),
                message: format!("'{raw}' is not a number of seconds"),
            })?;
            config.cron_tick_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = QueueConfig::default();
        assert_eq!(config.default_queue, SHORT_RUNNING_QUEUE);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn health_queue_carries_test_prefix() {
        assert!(HEALTH_CHECK_QUEUE.starts_with(TEST_PREFIX));
    }
}

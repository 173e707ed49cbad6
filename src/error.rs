//! Error types for relayq.

use uuid::Uuid;

/// Top-level error type for the queue core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Cron error: {0}")]
    Cron(#[from] CronError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Submission-time contract violations. Nothing is enqueued when one of
/// these is raised.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("A job may carry a cron expression or a time delta, not both")]
    ConflictingSchedule,

    #[error("Handler {name} is not registered")]
    UnknownHandler { name: String },

    #[error("Queue name must not be empty")]
    EmptyQueueName,

    #[error("Invalid queue state '{state}', expected one of: queued, failed")]
    InvalidQueueState { state: String },
}

/// Broker-related errors. Fatal for the operation attempted; never
/// retried by this core.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Broker connection is closed")]
    Closed,

    #[error("Job {id} not found")]
    JobNotFound { id: Uuid },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        BrokerError::Connection(err.to_string())
    }
}

/// Cron registration errors.
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

/// Result type alias for the queue core.
pub type Result<T> = std::result::Result<T, Error>;

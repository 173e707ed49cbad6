//! Handler registry mapping stable names to job implementations.
//!
//! Jobs carry a handler name across the process boundary instead of a
//! function reference; every worker process resolves the name against its
//! own registry at execution time. Delivery is at-least-once, so handlers
//! are expected to be idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Outcome of a handler run. The worker's retry decision keys off this
/// tag, not off any particular error hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Failed in a way worth retrying under the job's policy. A handler
    /// may also return this on an otherwise-clean path to explicitly
    /// request another run.
    Retry(String),
    /// Failed terminally; the job goes straight to the failed registry.
    Fatal(String),
}

/// A unit of work executable by any worker process.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Stable registry name carried inside jobs.
    fn name(&self) -> &str;

    async fn run(&self, args: &[Value], kwargs: &Map<String, Value>) -> JobOutcome;
}

/// Registry of available job handlers.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under its own name.
    pub async fn register(&self, handler: Arc<dyn JobHandler>) {
        let name = handler.name().to_string();
        self.handlers.write().await.insert(name.clone(), handler);
        tracing::debug!("Registered job handler: {}", name);
    }

    /// Get a handler by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    /// Check whether a handler exists.
    pub async fn has(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }

    /// List all registered handler names.
    pub async fn list(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }

    /// Number of registered handlers.
    pub async fn count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

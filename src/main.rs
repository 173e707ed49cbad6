use std::sync::Arc;

use relayq::broker::{Broker, PurgeState, RedisBroker};
use relayq::config::{
    HEALTH_CHECK_QUEUE, LONG_RUNNING_QUEUE, QueueConfig, SHORT_RUNNING_QUEUE,
};
use relayq::health::{HealthCheckHandler, run_health_check};
use relayq::registry::HandlerRegistry;
use relayq::scheduler::{QueueScheduler, WorkerMode};

/// Queues the purge command may touch.
const PURGEABLE_QUEUES: &[&str] = &[LONG_RUNNING_QUEUE, SHORT_RUNNING_QUEUE, HEALTH_CHECK_QUEUE];

fn usage() -> ! {
    eprintln!("Usage: relayq <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  worker <queue>... [--burst] [--with-scheduler]");
    eprintln!("      Process jobs from the named queues (default: {SHORT_RUNNING_QUEUE} {LONG_RUNNING_QUEUE}).");
    eprintln!("  purge <queue_name> [--queue_state queued|failed]");
    eprintln!("      Remove jobs from a queue. queue_name must be one of: {}.", PURGEABLE_QUEUES.join(", "));
    eprintln!("  health-check");
    eprintln!("      Enqueue and synchronously drain a liveness probe job.");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else { usage() };

    let config = QueueConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export REDIS_BASE_URL=redis://localhost:6379");
        std::process::exit(1);
    });

    match command.as_str() {
        "worker" => run_worker(&config, &args[1..]).await,
        "purge" => run_purge(&config, &args[1..]).await,
        "health-check" => {
            let broker = connect(&config).await?;
            run_health_check(broker).await?;
            println!("Health check OK");
            Ok(())
        }
        _ => usage(),
    }
}

async fn connect(config: &QueueConfig) -> anyhow::Result<Arc<dyn Broker>> {
    let broker = RedisBroker::connect(&config.broker_url).await?;
    Ok(Arc::new(broker))
}

async fn run_worker(config: &QueueConfig, args: &[String]) -> anyhow::Result<()> {
    let mut queues: Vec<String> = Vec::new();
    let mut burst = false;
    let mut with_scheduler = false;

    for arg in args {
        match arg.as_str() {
            "--burst" => burst = true,
            "--with-scheduler" => with_scheduler = true,
            flag if flag.starts_with("--") => usage(),
            queue => queues.push(queue.to_string()),
        }
    }
    if queues.is_empty() {
        queues = vec![
            SHORT_RUNNING_QUEUE.to_string(),
            LONG_RUNNING_QUEUE.to_string(),
        ];
    }

    let mode = if burst {
        WorkerMode::Burst
    } else {
        WorkerMode::Blocking
    };

    // Domain handlers are registered here by the embedding application;
    // the standalone binary ships with the health probe only.
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(HealthCheckHandler)).await;

    let broker = connect(config).await?;
    let scheduler = QueueScheduler::with_config(broker, registry, mode, config);
    let queue_refs: Vec<&str> = queues.iter().map(String::as_str).collect();
    let result = scheduler.work(&queue_refs, with_scheduler).await;
    scheduler.close().await?;
    result?;
    Ok(())
}

/// Parse `purge` arguments: a mandatory queue name from the allow-list
/// plus an optional `--queue_state` (the `--queue-state` spelling is
/// accepted too).
fn parse_purge(args: &[String]) -> Result<(String, PurgeState), String> {
    let mut queue_name: Option<&str> = None;
    let mut state = PurgeState::Queued;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--queue_state" | "--queue-state" => {
                let raw = iter
                    .next()
                    .ok_or_else(|| "--queue_state needs a value: queued or failed".to_string())?;
                state = raw.parse().map_err(|e| format!("{e}"))?;
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{flag}'")),
            name => queue_name = Some(name),
        }
    }

    let queue_name = queue_name.ok_or_else(|| "purge needs a queue_name".to_string())?;
    if !PURGEABLE_QUEUES.contains(&queue_name) {
        return Err(format!(
            "queue_name must be one of: {}",
            PURGEABLE_QUEUES.join(", ")
        ));
    }
    Ok((queue_name.to_string(), state))
}

async fn run_purge(config: &QueueConfig, args: &[String]) -> anyhow::Result<()> {
    let (queue_name, state) = match parse_purge(args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("Error: {message}");
            std::process::exit(2);
        }
    };

    let broker = connect(config).await?;
    let registry = Arc::new(HandlerRegistry::new());
    let scheduler = QueueScheduler::with_config(broker, registry, WorkerMode::Burst, config);
    let result = scheduler.purge(&queue_name, state).await;
    scheduler.close().await?;
    result?;

    println!("Successfully purged {state} on {queue_name} queue");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn purge_defaults_to_queued_state() {
        let (queue, state) = parse_purge(&args(&["short-running"])).unwrap();
        assert_eq!(queue, "short-running");
        assert_eq!(state, PurgeState::Queued);
    }

    #[test]
    fn purge_accepts_both_flag_spellings() {
        for flag in ["--queue_state", "--queue-state"] {
            let (_, state) = parse_purge(&args(&["long-running", flag, "failed"])).unwrap();
            assert_eq!(state, PurgeState::Failed);
        }
    }

    #[test]
    fn purge_rejects_unlisted_queue() {
        assert!(parse_purge(&args(&["mystery-queue"])).is_err());
    }

    #[test]
    fn purge_rejects_scheduled_state() {
        let result = parse_purge(&args(&["short-running", "--queue_state", "scheduled"]));
        assert!(result.is_err());
    }
}

use std::time::Duration;

use batchforge_core::config::{env_or, SchedulerConfig};
use batchforge_core::error::CoreError;
use batchforge_core::queue::{parse_queue_name, QueueName};

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Recorded as `claimed_by` on every claim.
    pub name: String,
    /// Number of units executed in parallel.
    pub concurrency: usize,
    /// Queues this worker drains.
    pub queues: Vec<QueueName>,
    /// Sleep between claims when every queue is empty.
    pub poll_interval: Duration,
    /// Claims older than this are considered orphaned and redelivered.
    pub claim_timeout: Duration,
    /// Endpoint of the synthesis service.
    pub synthesis_url: String,
    /// Per-request timeout for the synthesis service.
    pub synthesis_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                           |
    /// |-----------------------------|-----------------------------------|
    /// | `WORKER_NAME`               | `worker-<pid>`                    |
    /// | `WORKER_CONCURRENCY`        | `4`                               |
    /// | `WORKER_QUEUES`             | all configured queues             |
    /// | `WORKER_POLL_INTERVAL_MS`   | `500`                             |
    /// | `WORKER_CLAIM_TIMEOUT_SECS` | `600`                             |
    /// | `SYNTHESIS_URL`             | `http://localhost:8188/synthesize`|
    /// | `SYNTHESIS_TIMEOUT_SECS`    | `120`                             |
    pub fn from_env(scheduler: &SchedulerConfig) -> Result<Self, CoreError> {
        let name = std::env::var("WORKER_NAME")
            .unwrap_or_else(|_| format!("worker-{}", std::process::id()));

        let queues = match std::env::var("WORKER_QUEUES") {
            Ok(raw) => parse_queue_list(&raw, scheduler.queue_count)?,
            Err(_) => scheduler.queues(),
        };

        let config = Self {
            name,
            concurrency: env_or("WORKER_CONCURRENCY", 4)?,
            queues,
            poll_interval: Duration::from_millis(env_or("WORKER_POLL_INTERVAL_MS", 500)?),
            claim_timeout: Duration::from_secs(env_or("WORKER_CLAIM_TIMEOUT_SECS", 600)?),
            synthesis_url: std::env::var("SYNTHESIS_URL")
                .unwrap_or_else(|_| "http://localhost:8188/synthesize".into()),
            synthesis_timeout: Duration::from_secs(env_or("SYNTHESIS_TIMEOUT_SECS", 120)?),
        };

        if config.concurrency == 0 {
            return Err(CoreError::Validation(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Parse a comma-separated queue list, rejecting unknown names.
pub fn parse_queue_list(raw: &str, queue_count: usize) -> Result<Vec<QueueName>, CoreError> {
    let queues = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| parse_queue_name(name, queue_count))
        .collect::<Result<Vec<_>, _>>()?;

    if queues.is_empty() {
        return Err(CoreError::Validation(
            "WORKER_QUEUES must name at least one queue".to_string(),
        ));
    }
    Ok(queues)
}

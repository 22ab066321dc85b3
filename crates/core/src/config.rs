//! Scheduler settings shared by the API and worker processes.

use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;
use crate::queue::{queue_names, QueueName};
use crate::retry::RetryPolicy;

/// Default number of logical queues.
pub const DEFAULT_QUEUE_COUNT: usize = 20;

/// Default per-owner ceiling on pending + running jobs.
pub const DEFAULT_MAX_ACTIVE_JOBS: u32 = 3;

/// Scheduling configuration, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of logical queues (`queue_0..queue_{n-1}`).
    pub queue_count: usize,
    /// A submission is rejected once the owner has this many active jobs.
    pub max_active_jobs_per_owner: u32,
    /// Retry policy applied to failed unit deliveries.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_count: DEFAULT_QUEUE_COUNT,
            max_active_jobs_per_owner: DEFAULT_MAX_ACTIVE_JOBS,
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default |
    /// |-----------------------------|---------|
    /// | `QUEUE_COUNT`               | `20`    |
    /// | `MAX_ACTIVE_JOBS_PER_OWNER` | `3`     |
    /// | `UNIT_MAX_ATTEMPTS`         | `3`     |
    /// | `UNIT_RETRY_BASE_MS`        | `1000`  |
    /// | `UNIT_RETRY_MAX_MS`         | `60000` |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        let config = Self {
            queue_count: env_or("QUEUE_COUNT", defaults.queue_count)?,
            max_active_jobs_per_owner: env_or(
                "MAX_ACTIVE_JOBS_PER_OWNER",
                defaults.max_active_jobs_per_owner,
            )?,
            retry: RetryPolicy {
                max_attempts: env_or("UNIT_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_delay: Duration::from_millis(env_or(
                    "UNIT_RETRY_BASE_MS",
                    defaults.retry.base_delay.as_millis() as u64,
                )?),
                max_delay: Duration::from_millis(env_or(
                    "UNIT_RETRY_MAX_MS",
                    defaults.retry.max_delay.as_millis() as u64,
                )?),
                ..defaults.retry
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.queue_count == 0 {
            return Err(CoreError::Validation(
                "QUEUE_COUNT must be at least 1".to_string(),
            ));
        }
        if self.max_active_jobs_per_owner == 0 {
            return Err(CoreError::Validation(
                "MAX_ACTIVE_JOBS_PER_OWNER must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Validation(
                "UNIT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(CoreError::Validation(
                "UNIT_RETRY_BASE_MS must not exceed UNIT_RETRY_MAX_MS".to_string(),
            ));
        }
        Ok(())
    }

    /// All configured queue names.
    pub fn queues(&self) -> Vec<QueueName> {
        queue_names(self.queue_count)
    }
}

/// Read and parse `key`, falling back to `default` when unset.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            CoreError::Validation(format!("{key} has an invalid value: '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}

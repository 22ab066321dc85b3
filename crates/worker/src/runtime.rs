//! Claim loop driving the unit worker.
//!
//! Each slot claims one task at a time from the configured queues and runs it
//! to settlement. Cancellation stops new claims; a unit already in flight is
//! always finished and settled.

use std::sync::Arc;
use std::time::Duration;

use batchforge_core::error::StoreError;
use batchforge_core::ports::TaskQueue;
use batchforge_core::queue::QueueName;
use batchforge_core::retry::RetryPolicy;
use batchforge_core::unit_worker::{Settlement, UnitWorker};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Pool of claim slots sharing one [`UnitWorker`].
#[derive(Clone)]
pub struct WorkerRuntime {
    worker: UnitWorker,
    tasks: Arc<dyn TaskQueue>,
    policy: RetryPolicy,
    queues: Vec<QueueName>,
    name: String,
    poll_interval: Duration,
}

impl WorkerRuntime {
    pub fn new(
        worker: UnitWorker,
        tasks: Arc<dyn TaskQueue>,
        policy: RetryPolicy,
        queues: Vec<QueueName>,
        name: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker,
            tasks,
            policy,
            queues,
            name: name.into(),
            poll_interval,
        }
    }

    /// Claim and settle at most one task.
    ///
    /// Returns `Ok(None)` when every queue is empty.
    pub async fn run_once(&self, slot: &str) -> Result<Option<Settlement>, StoreError> {
        let Some(claimed) = self.tasks.claim(&self.queues, slot).await? else {
            return Ok(None);
        };

        tracing::debug!(
            slot,
            unit = %claimed.task.key(),
            queue = %claimed.queue,
            attempt = claimed.attempt,
            "Claimed unit task",
        );
        let settlement = self
            .worker
            .process(&claimed, self.tasks.as_ref(), &self.policy)
            .await;
        Ok(Some(settlement))
    }

    /// Run `concurrency` slots until `cancel` fires, then wait for every
    /// in-flight unit to settle.
    pub async fn run(self, concurrency: usize, cancel: CancellationToken) {
        tracing::info!(
            worker = %self.name,
            concurrency,
            queues = ?self.queues.iter().map(QueueName::as_str).collect::<Vec<_>>(),
            "Worker runtime started",
        );

        let mut slots = JoinSet::new();
        for index in 0..concurrency {
            let runtime = self.clone();
            let cancel = cancel.clone();
            slots.spawn(async move { runtime.run_slot(index, cancel).await });
        }

        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker slot panicked");
            }
        }
        tracing::info!(worker = %self.name, "Worker runtime stopped");
    }

    async fn run_slot(&self, index: usize, cancel: CancellationToken) {
        let slot = format!("{}#{index}", self.name);

        while !cancel.is_cancelled() {
            let idle = match self.run_once(&slot).await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    tracing::error!(slot = %slot, error = %e, "Failed to claim unit task");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        tracing::debug!(slot = %slot, "Worker slot stopping");
    }
}

//! Redelivery of orphaned unit tasks.
//!
//! A worker that dies mid-unit leaves its task claimed forever and its
//! queue's `running` counter one too high. The reaper periodically requeues
//! claims older than the claim timeout and moves each one's counter back
//! from `running` to `pending`.

use std::sync::Arc;
use std::time::Duration;

use batchforge_core::error::StoreError;
use batchforge_core::ports::{QueueLoadStore, TaskQueue};
use batchforge_core::queue::LoadCounter;
use tokio_util::sync::CancellationToken;

/// Requeue stale claims once. Returns how many tasks were requeued.
pub async fn reap_once(
    tasks: &dyn TaskQueue,
    queue_loads: &dyn QueueLoadStore,
    claim_timeout: Duration,
) -> Result<usize, StoreError> {
    let requeued = tasks.requeue_stale(claim_timeout).await?;

    for queue in &requeued {
        // Counter drift only skews selection; keep going.
        if let Err(e) = queue_loads.decrement(queue, LoadCounter::Running).await {
            tracing::warn!(queue = %queue, error = %e, "Reaper: failed to release running slot");
        }
        if let Err(e) = queue_loads.increment(queue, LoadCounter::Pending).await {
            tracing::warn!(queue = %queue, error = %e, "Reaper: failed to restore pending slot");
        }
    }
    Ok(requeued.len())
}

/// Run the reaper loop until `cancel` is triggered.
pub async fn run(
    tasks: Arc<dyn TaskQueue>,
    queue_loads: Arc<dyn QueueLoadStore>,
    claim_timeout: Duration,
    cancel: CancellationToken,
) {
    // Sweep four times per timeout window.
    let period = (claim_timeout / 4).max(Duration::from_secs(1));
    tracing::info!(
        claim_timeout_secs = claim_timeout.as_secs(),
        interval_secs = period.as_secs(),
        "Stale claim reaper started"
    );

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale claim reaper stopping");
                break;
            }
            _ = interval.tick() => {
                match reap_once(tasks.as_ref(), queue_loads.as_ref(), claim_timeout).await {
                    Ok(0) => tracing::debug!("Reaper: no stale claims"),
                    Ok(requeued) => tracing::warn!(requeued, "Reaper: requeued stale claims"),
                    Err(e) => tracing::error!(error = %e, "Reaper: sweep failed"),
                }
            }
        }
    }
}

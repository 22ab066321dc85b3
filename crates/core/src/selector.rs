//! Least-loaded queue selection over the shared load counters.

use std::sync::Arc;

use crate::error::StoreError;
use crate::ports::QueueLoadStore;
use crate::queue::{least_loaded, LoadSnapshot, QueueName};

/// Picks the queue a new unit task should go to.
///
/// The store is the single source of truth; nothing is cached locally.
#[derive(Clone)]
pub struct QueueSelector {
    store: Arc<dyn QueueLoadStore>,
    queues: Vec<QueueName>,
}

impl QueueSelector {
    pub fn new(store: Arc<dyn QueueLoadStore>, queues: Vec<QueueName>) -> Self {
        Self { store, queues }
    }

    pub fn queues(&self) -> &[QueueName] {
        &self.queues
    }

    /// Counters of every configured queue, read in one round trip.
    ///
    /// Queues without a stored row report zero; rows for queues outside the
    /// configured set are ignored.
    pub async fn snapshot_all(&self) -> Result<LoadSnapshot, StoreError> {
        let stored = self.store.snapshot_all().await?;
        Ok(self
            .queues
            .iter()
            .map(|q| (q.clone(), stored.get(q).copied().unwrap_or_default()))
            .collect())
    }

    /// The configured queue with the lowest `pending + running`, ties going
    /// to the smallest name.
    pub async fn select_best_queue(&self) -> Result<QueueName, StoreError> {
        let snapshot = self.snapshot_all().await?;
        least_loaded(&snapshot)
            .cloned()
            .ok_or_else(|| StoreError::Backend("no queues configured".to_string()))
    }

    pub async fn reset(&self, queue: Option<&QueueName>) -> Result<(), StoreError> {
        self.store.reset(queue).await
    }
}

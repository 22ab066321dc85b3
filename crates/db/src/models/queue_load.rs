//! Queue counter rows.

use batchforge_core::queue::{QueueLoad, QueueName};
use sqlx::FromRow;

/// A row from the `queue_loads` table.
#[derive(Debug, Clone, FromRow)]
pub struct QueueLoadRow {
    pub queue_name: String,
    pub pending: i64,
    pub running: i64,
}

impl QueueLoadRow {
    pub fn into_entry(self) -> (QueueName, QueueLoad) {
        (
            QueueName::new(self.queue_name),
            QueueLoad {
                pending: self.pending,
                running: self.running,
            },
        )
    }
}

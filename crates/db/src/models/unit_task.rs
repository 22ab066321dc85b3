//! Rows of the `unit_tasks` broker table.

use batchforge_core::job::UnitTask;
use batchforge_core::ports::{ClaimedTask, TaskHandle};
use batchforge_core::queue::QueueName;
use batchforge_core::types::{DbId, JobId, Timestamp};
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `unit_tasks` table.
#[derive(Debug, Clone, FromRow)]
pub struct UnitTaskRow {
    pub id: DbId,
    pub queue_name: String,
    pub job_id: JobId,
    pub owner_id: DbId,
    pub target_id: DbId,
    pub item_id: DbId,
    pub unit_index: i32,
    pub unit_kind: String,
    pub status_id: StatusId,
    pub attempts: i32,
    pub available_at: Timestamp,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl UnitTaskRow {
    pub fn task(&self) -> UnitTask {
        UnitTask {
            job_id: self.job_id,
            owner_id: self.owner_id,
            target_id: self.target_id,
            item_id: self.item_id,
            unit_index: self.unit_index,
            unit_kind: self.unit_kind.clone(),
        }
    }

    /// View of a freshly claimed row.
    pub fn into_claimed(self) -> ClaimedTask {
        ClaimedTask {
            handle: TaskHandle(self.id),
            task: self.task(),
            queue: QueueName::new(self.queue_name),
            attempt: u32::try_from(self.attempts).unwrap_or(0),
        }
    }
}

//! Job rows.

use batchforge_core::error::StoreError;
use batchforge_core::job::{Job, JobProgress};
use batchforge_core::types::{DbId, JobId, Timestamp};
use sqlx::FromRow;

use super::status::{job_status_from_id, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub owner_id: DbId,
    pub target_id: DbId,
    pub total_units: i32,
    pub completed_units: i32,
    pub status_id: StatusId,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            job_id: row.id,
            owner_id: row.owner_id,
            target_id: row.target_id,
            total_units: row.total_units,
            completed_units: row.completed_units,
            status: job_status_from_id(row.status_id)?,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Counter columns returned by a progress increment.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct ProgressRow {
    pub completed_units: i32,
    pub total_units: i32,
    pub status_id: StatusId,
}

impl TryFrom<ProgressRow> for JobProgress {
    type Error = StoreError;

    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        Ok(JobProgress {
            completed_units: row.completed_units,
            total_units: row.total_units,
            status: job_status_from_id(row.status_id)?,
        })
    }
}

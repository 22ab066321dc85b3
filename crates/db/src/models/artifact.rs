//! Artifact and unit failure rows.

use batchforge_core::job::{Artifact, UnitFailure};
use batchforge_core::types::{DbId, JobId, Timestamp};
use sqlx::FromRow;

/// A unit artifact from the `artifacts` table.
///
/// Only rows with all unit columns set are read through this struct.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub id: DbId,
    pub job_id: JobId,
    pub unit_index: i32,
    pub unit_kind: String,
    pub location: String,
    pub created_at: Timestamp,
}

impl From<ArtifactRow> for Artifact {
    fn from(row: ArtifactRow) -> Self {
        Artifact {
            job_id: row.job_id,
            unit_index: row.unit_index,
            unit_kind: row.unit_kind,
            location: row.location,
            created_at: row.created_at,
        }
    }
}

/// A row from the `unit_failures` table.
#[derive(Debug, Clone, FromRow)]
pub struct UnitFailureRow {
    pub id: DbId,
    pub job_id: JobId,
    pub unit_index: i32,
    pub unit_kind: String,
    pub error: String,
    pub attempts: i32,
    pub recorded_at: Timestamp,
}

impl From<UnitFailureRow> for UnitFailure {
    fn from(row: UnitFailureRow) -> Self {
        UnitFailure {
            job_id: row.job_id,
            unit_index: row.unit_index,
            unit_kind: row.unit_kind,
            error: row.error,
            attempts: row.attempts,
            recorded_at: row.recorded_at,
        }
    }
}

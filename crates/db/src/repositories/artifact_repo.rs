//! Repository for the `artifacts` table.
//!
//! Appending a unit artifact and advancing its job's counter share one
//! transaction, so an artifact never exists without its progress step.

use batchforge_core::job::{NewArtifact, UnitKey};
use batchforge_core::types::{DbId, JobId};
use sqlx::PgPool;

use crate::models::artifact::ArtifactRow;
use crate::models::job::ProgressRow;
use crate::models::status::JobStatus;

/// Column list for unit artifact queries.
const COLUMNS: &str = "id, job_id, unit_index, unit_kind, location, created_at";

/// Predicate matching the partial `uq_artifacts_unit` index.
const UNIT_PREDICATE: &str =
    "job_id IS NOT NULL AND unit_index IS NOT NULL AND unit_kind IS NOT NULL";

/// Unit artifact access.
pub struct ArtifactRepo;

impl ArtifactRepo {
    /// Store an artifact and advance its job in one transaction.
    ///
    /// Returns `None` without touching the job when an artifact already
    /// exists for the unit. The counter never passes `total_units`, and the
    /// job completes only from `running`.
    pub async fn append_with_progress(
        pool: &PgPool,
        input: &NewArtifact,
    ) -> Result<Option<ProgressRow>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let insert = format!(
            "INSERT INTO artifacts (job_id, unit_index, unit_kind, location) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (job_id, unit_index, unit_kind) WHERE {UNIT_PREDICATE} DO NOTHING \
             RETURNING id"
        );
        let inserted: Option<(DbId,)> = sqlx::query_as(&insert)
            .bind(input.key.job_id)
            .bind(input.key.unit_index)
            .bind(&input.key.unit_kind)
            .bind(&input.location)
            .fetch_optional(&mut *tx)
            .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let progress = sqlx::query_as::<_, ProgressRow>(
            "UPDATE jobs SET \
                 completed_units = LEAST(completed_units + 1, total_units), \
                 status_id = CASE \
                     WHEN status_id = $2 AND completed_units + 1 >= total_units THEN $3 \
                     ELSE status_id \
                 END \
             WHERE id = $1 \
             RETURNING completed_units, total_units, status_id",
        )
        .bind(input.key.job_id)
        .bind(JobStatus::Running.id())
        .bind(JobStatus::Completed.id())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(progress))
    }

    /// Whether an artifact is already stored for `key`.
    pub async fn exists(pool: &PgPool, key: &UnitKey) -> Result<bool, sqlx::Error> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS( \
                 SELECT 1 FROM artifacts \
                 WHERE job_id = $1 AND unit_index = $2 AND unit_kind = $3 \
             )",
        )
        .bind(key.job_id)
        .bind(key.unit_index)
        .bind(&key.unit_kind)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    /// Unit artifacts of a job in append order.
    pub async fn list_for_job(pool: &PgPool, job_id: JobId) -> Result<Vec<ArtifactRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM artifacts \
             WHERE job_id = $1 AND {UNIT_PREDICATE} \
             ORDER BY id"
        );
        sqlx::query_as::<_, ArtifactRow>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}

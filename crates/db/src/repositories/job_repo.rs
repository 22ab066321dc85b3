//! Repository for the `jobs` table.
//!
//! Status literals come from `models::status::JobStatus`; no magic numbers.

use batchforge_core::job::NewJob;
use batchforge_core::types::{DbId, JobId};
use sqlx::{PgExecutor, PgPool};

use crate::models::job::JobRow;
use crate::models::status::{JobStatus, ACTIVE_JOB_STATUSES};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, target_id, total_units, completed_units, \
    status_id, error, created_at, updated_at";

/// Outcome of [`JobRepo::admit`].
#[derive(Debug)]
pub enum AdmitRow {
    Admitted { job: JobRow, superseded: Vec<JobId> },
    OwnerAtLimit { active: i64 },
}

/// Job record access.
pub struct JobRepo;

impl JobRepo {
    /// Number of pending or running jobs owned by `owner_id`.
    pub async fn count_active_for_owner<'e>(
        executor: impl PgExecutor<'e>,
        owner_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE owner_id = $1 AND status_id IN ($2, $3)",
        )
        .bind(owner_id)
        .bind(ACTIVE_JOB_STATUSES[0])
        .bind(ACTIVE_JOB_STATUSES[1])
        .fetch_one(executor)
        .await?;
        Ok(count)
    }

    /// Fail every active job of `target_id` with `reason` in one statement.
    ///
    /// Returns the ids of the jobs that changed.
    pub async fn supersede_active_for_target<'e>(
        executor: impl PgExecutor<'e>,
        target_id: DbId,
        reason: &str,
    ) -> Result<Vec<JobId>, sqlx::Error> {
        let rows: Vec<(JobId,)> = sqlx::query_as(
            "UPDATE jobs SET status_id = $2, error = $3 \
             WHERE target_id = $1 AND status_id IN ($4, $5) \
             RETURNING id",
        )
        .bind(target_id)
        .bind(JobStatus::Failed.id())
        .bind(reason)
        .bind(ACTIVE_JOB_STATUSES[0])
        .bind(ACTIVE_JOB_STATUSES[1])
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Insert a running job with no completed units.
    ///
    /// Fails with a `uq_jobs_active_target` violation if the target already
    /// has an active job.
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        job_id: JobId,
        owner_id: DbId,
        target_id: DbId,
        total_units: i32,
    ) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, owner_id, target_id, total_units, status_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .bind(owner_id)
            .bind(target_id)
            .bind(total_units)
            .bind(JobStatus::Running.id())
            .fetch_one(executor)
            .await
    }

    /// Check the owner's ceiling, supersede the target's active jobs and
    /// insert the new job in one transaction.
    ///
    /// A transaction-scoped advisory lock keyed on the owner serialises
    /// concurrent admissions for that owner, so the count cannot go stale
    /// before the insert. Other owners only ever lower this owner's count
    /// (by superseding), so they need no lock.
    pub async fn admit(
        pool: &PgPool,
        job: &NewJob,
        limit: i64,
        supersede_reason: &str,
    ) -> Result<AdmitRow, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(job.owner_id)
            .execute(&mut *tx)
            .await?;

        let active = Self::count_active_for_owner(&mut *tx, job.owner_id).await?;
        if active >= limit {
            tx.rollback().await?;
            return Ok(AdmitRow::OwnerAtLimit { active });
        }

        let superseded =
            Self::supersede_active_for_target(&mut *tx, job.target_id, supersede_reason).await?;
        let row = Self::create(
            &mut *tx,
            job.job_id,
            job.owner_id,
            job.target_id,
            job.total_units,
        )
        .await?;

        tx.commit().await?;
        Ok(AdmitRow::Admitted {
            job: row,
            superseded,
        })
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

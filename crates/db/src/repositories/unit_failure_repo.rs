//! Repository for the `unit_failures` table.

use batchforge_core::job::UnitKey;
use batchforge_core::types::JobId;
use sqlx::PgPool;

use crate::models::artifact::UnitFailureRow;

const COLUMNS: &str = "id, job_id, unit_index, unit_kind, error, attempts, recorded_at";

pub struct UnitFailureRepo;

impl UnitFailureRepo {
    /// Insert or overwrite the failure note of one unit.
    pub async fn upsert(
        pool: &PgPool,
        key: &UnitKey,
        error: &str,
        attempts: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO unit_failures (job_id, unit_index, unit_kind, error, attempts) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT ON CONSTRAINT uq_unit_failures_unit DO UPDATE \
             SET error = EXCLUDED.error, attempts = EXCLUDED.attempts, recorded_at = NOW()",
        )
        .bind(key.job_id)
        .bind(key.unit_index)
        .bind(&key.unit_kind)
        .bind(error)
        .bind(attempts)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_job(
        pool: &PgPool,
        job_id: JobId,
    ) -> Result<Vec<UnitFailureRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM unit_failures \
             WHERE job_id = $1 \
             ORDER BY unit_index, unit_kind"
        );
        sqlx::query_as::<_, UnitFailureRow>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}

//! Repository for the `unit_tasks` broker table.
//!
//! Claims use `SELECT ... FOR UPDATE SKIP LOCKED` so any number of worker
//! processes can poll the same queues without double delivery.

use batchforge_core::job::UnitTask;
use batchforge_core::queue::QueueName;
use batchforge_core::types::DbId;
use sqlx::PgPool;

use crate::models::status::{StatusId, UnitTaskStatus};
use crate::models::unit_task::UnitTaskRow;

/// Column list for `unit_tasks` queries.
const COLUMNS: &str = "\
    id, queue_name, job_id, owner_id, target_id, item_id, unit_index, unit_kind, \
    status_id, attempts, available_at, claimed_by, claimed_at, last_error";

pub struct UnitTaskRepo;

impl UnitTaskRepo {
    /// Enqueue a task, immediately deliverable.
    pub async fn submit(pool: &PgPool, queue: &QueueName, task: &UnitTask) -> Result<DbId, sqlx::Error> {
        let (id,): (DbId,) = sqlx::query_as(
            "INSERT INTO unit_tasks \
                 (queue_name, job_id, owner_id, target_id, item_id, unit_index, unit_kind, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(queue.as_str())
        .bind(task.job_id)
        .bind(task.owner_id)
        .bind(task.target_id)
        .bind(task.item_id)
        .bind(task.unit_index)
        .bind(&task.unit_kind)
        .bind(UnitTaskStatus::Queued.id())
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    /// Atomically claim the oldest deliverable task across `queues`.
    pub async fn claim_next(
        pool: &PgPool,
        queues: &[QueueName],
        worker: &str,
    ) -> Result<Option<UnitTaskRow>, sqlx::Error> {
        let names: Vec<&str> = queues.iter().map(QueueName::as_str).collect();
        let query = format!(
            "UPDATE unit_tasks \
             SET status_id = $1, attempts = attempts + 1, claimed_by = $2, claimed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM unit_tasks \
                 WHERE status_id = $3 AND queue_name = ANY($4) AND available_at <= NOW() \
                 ORDER BY available_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UnitTaskRow>(&query)
            .bind(UnitTaskStatus::Running.id())
            .bind(worker)
            .bind(UnitTaskStatus::Queued.id())
            .bind(&names)
            .fetch_optional(pool)
            .await
    }

    /// Settle a task as succeeded.
    ///
    /// Every settlement is fenced on `attempt`: it only applies while the
    /// task is still running under that claim. Returns `false` when the
    /// claim was lost to the reaper or the task does not exist.
    pub async fn complete(pool: &PgPool, id: DbId, attempt: i32) -> Result<bool, sqlx::Error> {
        Self::settle(pool, id, attempt, UnitTaskStatus::Succeeded, None).await
    }

    /// Settle a task as permanently failed.
    pub async fn fail(pool: &PgPool, id: DbId, attempt: i32, error: &str) -> Result<bool, sqlx::Error> {
        Self::settle(pool, id, attempt, UnitTaskStatus::Failed, Some(error)).await
    }

    /// Put a task back in its queue, deliverable after `delay_ms`.
    pub async fn retry(
        pool: &PgPool,
        id: DbId,
        attempt: i32,
        delay_ms: i64,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE unit_tasks \
             SET status_id = $3, \
                 available_at = NOW() + ($4::BIGINT * INTERVAL '1 millisecond'), \
                 claimed_by = NULL, claimed_at = NULL, last_error = $5 \
             WHERE id = $1 AND attempts = $2 AND status_id = $6",
        )
        .bind(id)
        .bind(attempt)
        .bind(UnitTaskStatus::Queued.id())
        .bind(delay_ms)
        .bind(error)
        .bind(UnitTaskStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn status(pool: &PgPool, id: DbId) -> Result<Option<StatusId>, sqlx::Error> {
        let row: Option<(StatusId,)> =
            sqlx::query_as("SELECT status_id FROM unit_tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(status,)| status))
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<UnitTaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM unit_tasks WHERE id = $1");
        sqlx::query_as::<_, UnitTaskRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Requeue running tasks claimed more than `older_than_ms` ago.
    ///
    /// Returns the queue name of every requeued task.
    pub async fn requeue_stale(pool: &PgPool, older_than_ms: i64) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "UPDATE unit_tasks \
             SET status_id = $1, available_at = NOW(), claimed_by = NULL, claimed_at = NULL \
             WHERE status_id = $2 \
               AND claimed_at < NOW() - ($3::BIGINT * INTERVAL '1 millisecond') \
             RETURNING queue_name",
        )
        .bind(UnitTaskStatus::Queued.id())
        .bind(UnitTaskStatus::Running.id())
        .bind(older_than_ms)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(queue,)| queue).collect())
    }

    async fn settle(
        pool: &PgPool,
        id: DbId,
        attempt: i32,
        status: UnitTaskStatus,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE unit_tasks \
             SET status_id = $3, last_error = COALESCE($4, last_error) \
             WHERE id = $1 AND attempts = $2 AND status_id = $5",
        )
        .bind(id)
        .bind(attempt)
        .bind(status.id())
        .bind(error)
        .bind(UnitTaskStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

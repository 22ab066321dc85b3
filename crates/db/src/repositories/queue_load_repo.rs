//! Repository for the `queue_loads` counter table.
//!
//! Every write is a single statement, so concurrent dispatchers and
//! workers never lose updates.

use batchforge_core::queue::{LoadCounter, QueueName};
use sqlx::PgPool;

use crate::models::queue_load::QueueLoadRow;

pub struct QueueLoadRepo;

impl QueueLoadRepo {
    /// Create zeroed rows for any of `queues` that do not exist yet.
    pub async fn ensure_queues(pool: &PgPool, queues: &[QueueName]) -> Result<u64, sqlx::Error> {
        let names: Vec<&str> = queues.iter().map(QueueName::as_str).collect();
        let result = sqlx::query(
            "INSERT INTO queue_loads (queue_name) \
             SELECT UNNEST($1::TEXT[]) \
             ON CONFLICT (queue_name) DO NOTHING",
        )
        .bind(&names)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Add one to a counter, creating the row on first use.
    pub async fn increment(
        pool: &PgPool,
        queue: &QueueName,
        counter: LoadCounter,
    ) -> Result<(), sqlx::Error> {
        let column = counter.column();
        let query = format!(
            "INSERT INTO queue_loads (queue_name, {column}) VALUES ($1, 1) \
             ON CONFLICT (queue_name) DO UPDATE \
             SET {column} = queue_loads.{column} + 1"
        );
        sqlx::query(&query).bind(queue.as_str()).execute(pool).await?;
        Ok(())
    }

    /// Subtract one from a counter, clamped at zero.
    pub async fn decrement(
        pool: &PgPool,
        queue: &QueueName,
        counter: LoadCounter,
    ) -> Result<(), sqlx::Error> {
        let column = counter.column();
        let query = format!(
            "UPDATE queue_loads SET {column} = GREATEST({column} - 1, 0) \
             WHERE queue_name = $1"
        );
        sqlx::query(&query).bind(queue.as_str()).execute(pool).await?;
        Ok(())
    }

    /// All counter rows in one read.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<QueueLoadRow>, sqlx::Error> {
        sqlx::query_as::<_, QueueLoadRow>(
            "SELECT queue_name, pending, running FROM queue_loads ORDER BY queue_name",
        )
        .fetch_all(pool)
        .await
    }

    /// Zero one queue, or every queue when `queue` is `None`.
    pub async fn reset(pool: &PgPool, queue: Option<&QueueName>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE queue_loads SET pending = 0, running = 0 \
             WHERE $1::TEXT IS NULL OR queue_name = $1",
        )
        .bind(queue.map(QueueName::as_str))
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

//! Postgres persistence for the batch scheduler.
//!
//! Zero-sized repositories in [`repositories`] wrap the SQL; the adapters in
//! [`stores`] implement the `batchforge_core::ports` traits on top of them.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;
pub mod stores;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply all pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// Create the per-unit artifact uniqueness index if it is missing.
///
/// Safe to call on every startup; an existing index is left alone.
pub async fn ensure_unit_uniqueness(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_artifacts_unit \
         ON artifacts(job_id, unit_index, unit_kind) \
         WHERE job_id IS NOT NULL AND unit_index IS NOT NULL AND unit_kind IS NOT NULL",
    )
    .execute(pool)
    .await?;
    Ok(())
}

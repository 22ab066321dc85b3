//! Postgres implementations of the engine ports.
//!
//! Each adapter is a thin, cloneable wrapper around the pool that delegates
//! to a repository and translates `sqlx::Error` into [`StoreError`].

use std::time::Duration;

use async_trait::async_trait;
use batchforge_core::error::StoreError;
use batchforge_core::job::{
    AppendOutcome, Artifact, Job, NewArtifact, NewJob, UnitFailure, UnitKey, UnitTask,
};
use batchforge_core::ports::{
    Admission, ClaimedTask, CreditGate, DebitOutcome, JobStore, QueueLoadStore, TaskHandle,
    TaskQueue, TaskState,
};
use batchforge_core::queue::{LoadCounter, LoadSnapshot, QueueName};
use batchforge_core::types::{DbId, JobId};

use crate::models::status::task_state_from_id;
use crate::repositories::job_repo::AdmitRow;
use crate::repositories::{
    ArtifactRepo, CreditRepo, JobRepo, QueueLoadRepo, UnitFailureRepo, UnitTaskRepo,
};
use crate::DbPool;

/// PostgreSQL unique violation.
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL foreign key violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Translate a driver error into the port error type.
///
/// Unique violations become [`StoreError::Conflict`] carrying the
/// constraint name; everything else is a backend failure.
pub fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Conflict {
                constraint: db_err.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    StoreError::backend(err)
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION))
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Queue loads
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgQueueLoadStore {
    pool: DbPool,
}

impl PgQueueLoadStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Seed zeroed counter rows for the configured queues.
    pub async fn ensure_queues(&self, queues: &[QueueName]) -> Result<(), StoreError> {
        let created = QueueLoadRepo::ensure_queues(&self.pool, queues)
            .await
            .map_err(store_error)?;
        if created > 0 {
            tracing::info!(created, "Queue counter rows created");
        }
        Ok(())
    }
}

#[async_trait]
impl QueueLoadStore for PgQueueLoadStore {
    async fn increment(&self, queue: &QueueName, counter: LoadCounter) -> Result<(), StoreError> {
        QueueLoadRepo::increment(&self.pool, queue, counter)
            .await
            .map_err(store_error)
    }

    async fn decrement(&self, queue: &QueueName, counter: LoadCounter) -> Result<(), StoreError> {
        QueueLoadRepo::decrement(&self.pool, queue, counter)
            .await
            .map_err(store_error)
    }

    async fn snapshot_all(&self) -> Result<LoadSnapshot, StoreError> {
        let rows = QueueLoadRepo::list_all(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(|row| row.into_entry()).collect())
    }

    async fn reset(&self, queue: Option<&QueueName>) -> Result<(), StoreError> {
        let reset = QueueLoadRepo::reset(&self.pool, queue)
            .await
            .map_err(store_error)?;
        tracing::info!(queue = ?queue.map(QueueName::as_str), reset, "Queue counters reset");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await.map_err(store_error)
    }

    async fn count_active_for_owner(&self, owner_id: DbId) -> Result<u32, StoreError> {
        let count = JobRepo::count_active_for_owner(&self.pool, owner_id)
            .await
            .map_err(store_error)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn admit_job(
        &self,
        job: &NewJob,
        limit: u32,
        supersede_reason: &str,
    ) -> Result<Admission, StoreError> {
        let admitted = JobRepo::admit(&self.pool, job, i64::from(limit), supersede_reason)
            .await
            .map_err(store_error)?;
        match admitted {
            AdmitRow::Admitted { job, superseded } => Ok(Admission::Admitted {
                job: job.try_into()?,
                superseded,
            }),
            AdmitRow::OwnerAtLimit { active } => Ok(Admission::OwnerAtLimit {
                active: u32::try_from(active).unwrap_or(u32::MAX),
            }),
        }
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        JobRepo::find_by_id(&self.pool, job_id)
            .await
            .map_err(store_error)?
            .map(Job::try_from)
            .transpose()
    }

    async fn list_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError> {
        let rows = ArtifactRepo::list_for_job(&self.pool, job_id)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(Artifact::from).collect())
    }

    async fn artifact_exists(&self, key: &UnitKey) -> Result<bool, StoreError> {
        ArtifactRepo::exists(&self.pool, key)
            .await
            .map_err(store_error)
    }

    async fn append_artifact(&self, artifact: &NewArtifact) -> Result<AppendOutcome, StoreError> {
        match ArtifactRepo::append_with_progress(&self.pool, artifact).await {
            Ok(Some(progress)) => Ok(AppendOutcome::Appended(progress.try_into()?)),
            Ok(None) => Ok(AppendOutcome::Duplicate),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::NotFound {
                entity: "Job",
                id: artifact.key.job_id.to_string(),
            }),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn record_unit_failure(
        &self,
        key: &UnitKey,
        error: &str,
        attempts: i32,
    ) -> Result<(), StoreError> {
        UnitFailureRepo::upsert(&self.pool, key, error, attempts)
            .await
            .map_err(store_error)
    }

    async fn list_unit_failures(&self, job_id: JobId) -> Result<Vec<UnitFailure>, StoreError> {
        let rows = UnitFailureRepo::list_for_job(&self.pool, job_id)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(UnitFailure::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgTaskQueue {
    pool: DbPool,
}

impl PgTaskQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn claim_attempt(claim: &ClaimedTask) -> i32 {
    i32::try_from(claim.attempt).unwrap_or(i32::MAX)
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn submit(&self, queue: &QueueName, task: &UnitTask) -> Result<TaskHandle, StoreError> {
        let id = UnitTaskRepo::submit(&self.pool, queue, task)
            .await
            .map_err(store_error)?;
        Ok(TaskHandle(id))
    }

    async fn claim(&self, queues: &[QueueName], worker: &str) -> Result<Option<ClaimedTask>, StoreError> {
        let row = UnitTaskRepo::claim_next(&self.pool, queues, worker)
            .await
            .map_err(store_error)?;
        Ok(row.map(|r| r.into_claimed()))
    }

    async fn complete(&self, claim: &ClaimedTask) -> Result<bool, StoreError> {
        UnitTaskRepo::complete(&self.pool, claim.handle.0, claim_attempt(claim))
            .await
            .map_err(store_error)
    }

    async fn retry(&self, claim: &ClaimedTask, delay: Duration, error: &str) -> Result<bool, StoreError> {
        UnitTaskRepo::retry(&self.pool, claim.handle.0, claim_attempt(claim), millis(delay), error)
            .await
            .map_err(store_error)
    }

    async fn fail(&self, claim: &ClaimedTask, error: &str) -> Result<bool, StoreError> {
        UnitTaskRepo::fail(&self.pool, claim.handle.0, claim_attempt(claim), error)
            .await
            .map_err(store_error)
    }

    async fn status(&self, handle: TaskHandle) -> Result<Option<TaskState>, StoreError> {
        UnitTaskRepo::status(&self.pool, handle.0)
            .await
            .map_err(store_error)?
            .map(task_state_from_id)
            .transpose()
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<Vec<QueueName>, StoreError> {
        let queues = UnitTaskRepo::requeue_stale(&self.pool, millis(older_than))
            .await
            .map_err(store_error)?;
        Ok(queues.into_iter().map(QueueName::new).collect())
    }
}

// ---------------------------------------------------------------------------
// Credits
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgCreditLedger {
    pool: DbPool,
}

impl PgCreditLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditGate for PgCreditLedger {
    async fn debit(&self, owner_id: DbId, amount: i64) -> Result<DebitOutcome, StoreError> {
        let debited = CreditRepo::debit_if_sufficient(&self.pool, owner_id, amount)
            .await
            .map_err(store_error)?;
        match debited {
            Some(remaining) => Ok(DebitOutcome::Debited { remaining }),
            None => {
                let balance = CreditRepo::balance(&self.pool, owner_id)
                    .await
                    .map_err(store_error)?;
                Ok(DebitOutcome::Insufficient { balance })
            }
        }
    }
}

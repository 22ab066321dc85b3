//! Storage, broker and collaborator interfaces consumed by the engine.
//!
//! Every shared mutable resource sits behind one of these traits. The
//! Postgres implementations live in `batchforge-db`; in-process versions for
//! tests and single-node runs live in [`crate::memory`]. Implementations must
//! make each method atomic at the storage layer, since dispatchers and
//! workers run in separate processes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::job::{AppendOutcome, Artifact, Job, NewArtifact, NewJob, UnitFailure, UnitKey, UnitTask};
use crate::queue::{LoadCounter, LoadSnapshot, QueueName};
use crate::types::{DbId, JobId};

// ---------------------------------------------------------------------------
// Queue load store
// ---------------------------------------------------------------------------

/// Shared `pending` / `running` counters per logical queue.
#[async_trait]
pub trait QueueLoadStore: Send + Sync {
    /// Atomically add one to `counter` of `queue`.
    async fn increment(&self, queue: &QueueName, counter: LoadCounter) -> Result<(), StoreError>;

    /// Atomically subtract one from `counter` of `queue`, clamped at zero.
    async fn decrement(&self, queue: &QueueName, counter: LoadCounter) -> Result<(), StoreError>;

    /// Counters of every known queue, read in one round trip.
    async fn snapshot_all(&self) -> Result<LoadSnapshot, StoreError>;

    /// Zero the counters of one queue, or of all queues when `None`.
    async fn reset(&self, queue: Option<&QueueName>) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Job record store
// ---------------------------------------------------------------------------

/// Result of [`JobStore::admit_job`].
#[derive(Debug, Clone)]
pub enum Admission {
    Admitted {
        job: Job,
        /// Older jobs for the same target failed by this admission.
        superseded: Vec<JobId>,
    },
    OwnerAtLimit { active: u32 },
}

/// Durable job records, their artifacts and per-unit failure notes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Cheap connectivity check.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Number of `pending` or `running` jobs owned by `owner_id`.
    ///
    /// Advisory only: [`JobStore::admit_job`] re-checks the ceiling
    /// atomically.
    async fn count_active_for_owner(&self, owner_id: DbId) -> Result<u32, StoreError>;

    /// Admit `job` as one atomic step, serialised per owner:
    ///
    /// 1. if the owner already has `limit` or more active jobs, change
    ///    nothing and return [`Admission::OwnerAtLimit`];
    /// 2. fail every active job of the same target with `supersede_reason`;
    /// 3. persist the job in `running` state with no completed units.
    ///
    /// Fails with [`StoreError::Conflict`] if a concurrent admission for
    /// another owner created an active job for the target first; nothing is
    /// superseded in that case.
    async fn admit_job(
        &self,
        job: &NewJob,
        limit: u32,
        supersede_reason: &str,
    ) -> Result<Admission, StoreError>;

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Artifacts of a job in append order.
    async fn list_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError>;

    /// Whether an artifact is already stored for `key`.
    async fn artifact_exists(&self, key: &UnitKey) -> Result<bool, StoreError>;

    /// Store an artifact and bump the job's completed counter as one atomic
    /// step. The unit uniqueness constraint decides between
    /// [`AppendOutcome::Appended`] and [`AppendOutcome::Duplicate`].
    async fn append_artifact(&self, artifact: &NewArtifact) -> Result<AppendOutcome, StoreError>;

    /// Upsert the terminal failure note for one unit.
    async fn record_unit_failure(
        &self,
        key: &UnitKey,
        error: &str,
        attempts: i32,
    ) -> Result<(), StoreError>;

    async fn list_unit_failures(&self, job_id: JobId) -> Result<Vec<UnitFailure>, StoreError>;
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

/// Broker-assigned identifier of a submitted unit task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskHandle(pub DbId);

/// Delivery state of a unit task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// A task handed to exactly one worker until settled or reclaimed.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub handle: TaskHandle,
    pub queue: QueueName,
    pub task: UnitTask,
    /// 1-based delivery count including this one.
    pub attempt: u32,
}

/// Named-queue task transport with retry and status primitives.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn submit(&self, queue: &QueueName, task: &UnitTask) -> Result<TaskHandle, StoreError>;

    /// Claim the oldest available task across `queues`, if any.
    async fn claim(&self, queues: &[QueueName], worker: &str) -> Result<Option<ClaimedTask>, StoreError>;

    /// Settle a claimed task as succeeded.
    ///
    /// Settlements only apply while `claim` is still the task's current
    /// claim. They return `false` when the claim was lost (the reaper
    /// requeued the task, possibly to another worker) or the task is gone.
    async fn complete(&self, claim: &ClaimedTask) -> Result<bool, StoreError>;

    /// Return a claimed task to its queue, deliverable again after `delay`.
    async fn retry(&self, claim: &ClaimedTask, delay: Duration, error: &str) -> Result<bool, StoreError>;

    /// Settle a claimed task as permanently failed.
    async fn fail(&self, claim: &ClaimedTask, error: &str) -> Result<bool, StoreError>;

    async fn status(&self, handle: TaskHandle) -> Result<Option<TaskState>, StoreError>;

    /// Requeue tasks claimed longer than `older_than` ago. Returns the queue
    /// of every requeued task so callers can move its load counters.
    async fn requeue_stale(&self, older_than: Duration) -> Result<Vec<QueueName>, StoreError>;
}

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

/// Outcome of a metered-resource debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { remaining: i64 },
    Insufficient { balance: i64 },
}

/// Atomic debit-if-sufficient against an owner's credit balance.
#[async_trait]
pub trait CreditGate: Send + Sync {
    async fn debit(&self, owner_id: DbId, amount: i64) -> Result<DebitOutcome, StoreError>;
}

/// What the synthesis collaborator produced for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedArtifact {
    /// Where the stored asset can be fetched.
    pub location: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// Network failure, timeout or 5xx; worth another attempt.
    #[error("Synthesis request failed: {0}")]
    Transient(String),

    /// The collaborator refused this unit; retrying will not help.
    #[error("Synthesis rejected the unit: {0}")]
    Rejected(String),
}

/// The external generative call that turns one unit into a stored asset.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, task: &UnitTask) -> Result<SynthesizedArtifact, SynthesisError>;
}

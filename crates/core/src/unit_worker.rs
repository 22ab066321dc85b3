//! Execution of a single unit task.
//!
//! Per unit, causally: credit debit, synthesis, artifact append (which also
//! moves the job counter). The unit uniqueness constraint behind
//! [`JobStore::append_artifact`] is what stops a redelivered duplicate from
//! producing a second artifact; the `artifact_exists` pre-check only saves
//! the synthesis call in the common case.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::job::{AppendOutcome, Job, JobProgress, JobStatus, NewArtifact, UnitTask};
use crate::ports::{
    ClaimedTask, CreditGate, DebitOutcome, JobStore, QueueLoadStore, SynthesisError, Synthesizer,
    TaskQueue,
};
use crate::queue::{LoadCounter, QueueName};
use crate::retry::RetryPolicy;

/// Credits charged per produced unit.
pub const UNIT_CREDIT_COST: i64 = 1;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Successful end of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSuccess {
    /// This delivery produced and stored the unit's artifact.
    Produced { location: String, progress: JobProgress },
    /// A racing delivery already stored it; nothing was changed.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitErrorKind {
    /// Owner cannot pay for the unit.
    InsufficientCredits,
    /// The job record is gone.
    JobNotFound,
    /// The task's coordinates do not describe a unit of its job.
    InvalidTask,
    /// Synthesis collaborator failed transiently.
    Synthesis,
    /// Synthesis collaborator refused the unit.
    SynthesisRejected,
    /// A store call failed.
    Storage,
}

impl UnitErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientCredits => "insufficient_credits",
            Self::JobNotFound => "job_not_found",
            Self::InvalidTask => "invalid_task",
            Self::Synthesis => "synthesis",
            Self::SynthesisRejected => "synthesis_rejected",
            Self::Storage => "storage",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Synthesis | Self::Storage)
    }
}

impl fmt::Display for UnitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged unit failure consumed by the retry settlement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct UnitError {
    pub kind: UnitErrorKind,
    pub message: String,
}

impl UnitError {
    pub fn new(kind: UnitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<StoreError> for UnitError {
    fn from(err: StoreError) -> Self {
        Self::new(UnitErrorKind::Storage, err.to_string())
    }
}

impl From<SynthesisError> for UnitError {
    fn from(err: SynthesisError) -> Self {
        match err {
            SynthesisError::Transient(msg) => Self::new(UnitErrorKind::Synthesis, msg),
            SynthesisError::Rejected(msg) => Self::new(UnitErrorKind::SynthesisRejected, msg),
        }
    }
}

pub type UnitResult = Result<UnitSuccess, UnitError>;

/// How a claimed task was settled against the task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed(UnitSuccess),
    Retrying { attempt: u32, delay: Duration },
    Failed(UnitError),
    /// The task was reclaimed before this worker could settle it. The
    /// current claim holder settles it instead.
    ClaimLost,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Runs unit tasks. Holds no per-unit state, so one instance serves every
/// slot of a worker process.
#[derive(Clone)]
pub struct UnitWorker {
    jobs: Arc<dyn JobStore>,
    queue_loads: Arc<dyn QueueLoadStore>,
    credits: Arc<dyn CreditGate>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl UnitWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue_loads: Arc<dyn QueueLoadStore>,
        credits: Arc<dyn CreditGate>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            jobs,
            queue_loads,
            credits,
            synthesizer,
        }
    }

    /// Execute one delivery of `task` taken from `queue`, keeping the
    /// queue's load counters in step.
    pub async fn execute(&self, queue: &QueueName, task: &UnitTask) -> UnitResult {
        self.bump(queue, LoadCounter::Pending, false).await;
        self.bump(queue, LoadCounter::Running, true).await;

        let result = self.run_unit(task).await;

        self.bump(queue, LoadCounter::Running, false).await;
        result
    }

    /// Execute a claimed task and settle it: complete, schedule a retry
    /// with backoff, or record a terminal failure on the job.
    ///
    /// A unit's failure never fails its job or its siblings.
    pub async fn process(
        &self,
        claimed: &ClaimedTask,
        tasks: &dyn TaskQueue,
        policy: &RetryPolicy,
    ) -> Settlement {
        let key = claimed.task.key();
        let result = self.execute(&claimed.queue, &claimed.task).await;

        match result {
            Ok(success) => {
                match tasks.complete(claimed).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(unit = %key, "Claim lost before completion was recorded")
                    }
                    Err(e) => tracing::warn!(unit = %key, error = %e, "Failed to mark task complete"),
                }
                Settlement::Completed(success)
            }
            Err(err) if err.kind.is_retryable() && policy.should_retry(claimed.attempt) => {
                let delay = policy.delay_for_attempt(claimed.attempt);
                match tasks.retry(claimed, delay, &err.to_string()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(
                            unit = %key,
                            attempt = claimed.attempt,
                            "Claim lost, retry skipped",
                        );
                        return Settlement::ClaimLost;
                    }
                    // The stale-claim reaper redelivers it later.
                    Err(e) => tracing::error!(unit = %key, error = %e, "Failed to schedule retry"),
                }
                tracing::warn!(
                    unit = %key,
                    attempt = claimed.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Unit failed, retrying",
                );
                self.bump(&claimed.queue, LoadCounter::Pending, true).await;
                Settlement::Retrying {
                    attempt: claimed.attempt,
                    delay,
                }
            }
            Err(err) => {
                match tasks.fail(claimed, &err.to_string()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(
                            unit = %key,
                            attempt = claimed.attempt,
                            "Claim lost, failure not recorded",
                        );
                        return Settlement::ClaimLost;
                    }
                    Err(e) => tracing::warn!(unit = %key, error = %e, "Failed to mark task failed"),
                }
                tracing::error!(
                    unit = %key,
                    attempt = claimed.attempt,
                    error = %err,
                    "Unit failed permanently",
                );
                let attempts = i32::try_from(claimed.attempt).unwrap_or(i32::MAX);
                if let Err(e) = self
                    .jobs
                    .record_unit_failure(&key, &err.to_string(), attempts)
                    .await
                {
                    tracing::error!(unit = %key, error = %e, "Failed to record unit failure");
                }
                Settlement::Failed(err)
            }
        }
    }

    /// The idempotency check runs before the debit, so a redelivered unit is never billed twice.
    async fn run_unit(&self, task: &UnitTask) -> UnitResult {
        let key = task.key();

        let job = self.jobs.find_job(task.job_id).await?.ok_or_else(|| {
            UnitError::new(UnitErrorKind::JobNotFound, format!("job {} does not exist", task.job_id))
        })?;
        check_task(task, &job)?;
        if job.status == JobStatus::Failed {
            tracing::info!(unit = %key, "Job already failed; result kept for audit only");
        }

        if self.jobs.artifact_exists(&key).await? {
            tracing::debug!(unit = %key, "Artifact already exists, skipping");
            return Ok(UnitSuccess::Duplicate);
        }

        match self.credits.debit(task.owner_id, UNIT_CREDIT_COST).await? {
            DebitOutcome::Debited { remaining } => {
                tracing::debug!(unit = %key, remaining, "Credit debited");
            }
            DebitOutcome::Insufficient { balance } => {
                return Err(UnitError::new(
                    UnitErrorKind::InsufficientCredits,
                    format!("owner {} has {balance} credits", task.owner_id),
                ));
            }
        }

        let produced = self.synthesizer.synthesize(task).await?;

        let outcome = self
            .jobs
            .append_artifact(&NewArtifact {
                key: key.clone(),
                location: produced.location.clone(),
            })
            .await?;

        match outcome {
            AppendOutcome::Appended(progress) => {
                tracing::info!(
                    unit = %key,
                    completed_units = progress.completed_units,
                    total_units = progress.total_units,
                    "Unit artifact recorded",
                );
                if progress.status == JobStatus::Completed {
                    tracing::info!(job_id = %task.job_id, "Job completed");
                }
                Ok(UnitSuccess::Produced {
                    location: produced.location,
                    progress,
                })
            }
            AppendOutcome::Duplicate => {
                tracing::warn!(unit = %key, "Racing delivery stored this unit first; result dropped");
                Ok(UnitSuccess::Duplicate)
            }
        }
    }

    /// Best-effort counter update; a lost update only skews balancing.
    async fn bump(&self, queue: &QueueName, counter: LoadCounter, up: bool) {
        let result = if up {
            self.queue_loads.increment(queue, counter).await
        } else {
            self.queue_loads.decrement(queue, counter).await
        };
        if let Err(e) = result {
            tracing::warn!(
                queue = %queue,
                counter = counter.column(),
                error = %e,
                "Queue counter update failed",
            );
        }
    }
}

fn check_task(task: &UnitTask, job: &Job) -> Result<(), UnitError> {
    let invalid = |message: String| -> Result<(), UnitError> {
        Err(UnitError::new(UnitErrorKind::InvalidTask, message))
    };
    if task.unit_index < 0 {
        return invalid(format!("negative unit index {}", task.unit_index));
    }
    if task.unit_kind.trim().is_empty() {
        return invalid("blank unit kind".to_string());
    }
    if task.owner_id != job.owner_id || task.target_id != job.target_id {
        return invalid(format!(
            "task for owner {} target {} does not match job {}",
            task.owner_id, task.target_id, job.job_id
        ));
    }
    Ok(())
}

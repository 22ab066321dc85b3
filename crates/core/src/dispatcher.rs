//! Bulk job admission, decomposition and unit submission.
//!
//! [`JobDispatcher::submit`] never waits for units to run: it admits the
//! request, supersedes older batches for the same target, records the job
//! and pushes one task per unit onto the least-loaded queue.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::{CoreError, StoreError};
use crate::job::{
    Artifact, JobDimensions, JobStatus, NewJob, UnitFailure, UnitTask, SUPERSEDED_REASON,
};
use crate::ports::{Admission, JobStore, QueueLoadStore, TaskQueue};
use crate::queue::LoadCounter;
use crate::selector::QueueSelector;
use crate::types::{DbId, JobId};

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A bulk "generate these units" request.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub owner_id: DbId,
    pub target_id: DbId,
    #[serde(flatten)]
    pub dimensions: JobDimensions,
}

/// Returned as soon as every unit is queued.
#[derive(Debug, Clone, Serialize)]
pub struct JobReceipt {
    pub job_id: JobId,
    pub total_units: i32,
    /// Older jobs for the same target that were failed by this submission.
    pub superseded: Vec<JobId>,
}

/// What a polling client sees.
///
/// `artifacts` belong to the current batch only while `status` is
/// `running` or `completed`; a failed job's artifacts are kept for audit.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub owner_id: DbId,
    pub target_id: DbId,
    pub status: JobStatus,
    pub total_units: i32,
    pub completed_units: i32,
    pub error: Option<String>,
    pub artifacts: Vec<Artifact>,
    pub unit_failures: Vec<UnitFailure>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Owner {owner_id} already has {active} active jobs (limit {limit})")]
    TooManyActiveJobs { owner_id: DbId, active: u32, limit: u32 },

    #[error("Request produces no units to generate")]
    NoUnitsToGenerate,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A concurrent submission by another owner created an active job for
    /// the same target first.
    #[error("Target {target_id} already has an active job")]
    TargetBusy { target_id: DbId },

    /// The job exists but only `submitted` of its units reached a queue.
    #[error("Job {job_id}: only {submitted} units were queued: {source}")]
    Submission {
        job_id: JobId,
        submitted: usize,
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CoreError> for DispatchError {
    fn from(err: CoreError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Entry point for job submission and polling. Cheap to clone.
#[derive(Clone)]
pub struct JobDispatcher {
    jobs: Arc<dyn JobStore>,
    tasks: Arc<dyn TaskQueue>,
    queue_loads: Arc<dyn QueueLoadStore>,
    selector: QueueSelector,
    config: SchedulerConfig,
}

impl JobDispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tasks: Arc<dyn TaskQueue>,
        queue_loads: Arc<dyn QueueLoadStore>,
        config: SchedulerConfig,
    ) -> Self {
        let selector = QueueSelector::new(Arc::clone(&queue_loads), config.queues());
        Self {
            jobs,
            tasks,
            queue_loads,
            selector,
            config,
        }
    }

    pub fn selector(&self) -> &QueueSelector {
        &self.selector
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn store_healthy(&self) -> bool {
        self.jobs.health_check().await.is_ok()
    }

    /// Admit, decompose and enqueue a bulk request.
    ///
    /// Admission failures (`TooManyActiveJobs`, `NoUnitsToGenerate`,
    /// `InvalidRequest`) leave no trace in any store.
    pub async fn submit(&self, request: &JobRequest) -> Result<JobReceipt, DispatchError> {
        request.dimensions.validate()?;

        let limit = self.config.max_active_jobs_per_owner;
        // Cheap early rejection; `admit_job` enforces the ceiling atomically.
        let active = self.jobs.count_active_for_owner(request.owner_id).await?;
        if active >= limit {
            return Err(self.over_limit(request.owner_id, active));
        }

        let total_units = request.dimensions.total_units();
        if total_units == 0 {
            return Err(DispatchError::NoUnitsToGenerate);
        }

        let new_job = NewJob {
            job_id: uuid::Uuid::now_v7(),
            owner_id: request.owner_id,
            target_id: request.target_id,
            total_units: total_units as i32,
        };
        // Supersession and creation share one store step, so no reader ever
        // sees two running jobs for one target.
        let admission = self
            .jobs
            .admit_job(&new_job, limit, SUPERSEDED_REASON)
            .await;
        let (job, superseded) = match admission {
            Ok(Admission::Admitted { job, superseded }) => (job, superseded),
            Ok(Admission::OwnerAtLimit { active }) => {
                return Err(self.over_limit(request.owner_id, active))
            }
            Err(StoreError::Conflict { .. }) => {
                return Err(DispatchError::TargetBusy {
                    target_id: request.target_id,
                })
            }
            Err(e) => return Err(e.into()),
        };
        for old in &superseded {
            tracing::info!(
                job_id = %old,
                target_id = request.target_id,
                "Job superseded by newer batch",
            );
        }

        let tasks = request
            .dimensions
            .decompose(job.job_id, job.owner_id, job.target_id);
        self.enqueue_all(job.job_id, &tasks).await?;

        tracing::info!(
            job_id = %job.job_id,
            owner_id = job.owner_id,
            target_id = job.target_id,
            total_units = job.total_units,
            "Job submitted",
        );

        Ok(JobReceipt {
            job_id: job.job_id,
            total_units: job.total_units,
            superseded,
        })
    }

    fn over_limit(&self, owner_id: DbId, active: u32) -> DispatchError {
        let limit = self.config.max_active_jobs_per_owner;
        tracing::info!(owner_id, active, limit, "Job rejected: too many active jobs");
        DispatchError::TooManyActiveJobs {
            owner_id,
            active,
            limit,
        }
    }

    /// Push every unit to the currently least-loaded queue.
    ///
    /// If the broker fails partway, the remaining units get a failure note
    /// so pollers can tell the job will never reach its total.
    async fn enqueue_all(&self, job_id: JobId, tasks: &[UnitTask]) -> Result<(), DispatchError> {
        for (submitted, task) in tasks.iter().enumerate() {
            let result = async {
                let queue = self.selector.select_best_queue().await?;
                self.tasks.submit(&queue, task).await?;
                Ok::<_, StoreError>(queue)
            }
            .await;

            match result {
                Ok(queue) => {
                    // Counter loss only skews balancing, never correctness.
                    if let Err(e) = self.queue_loads.increment(&queue, LoadCounter::Pending).await {
                        tracing::warn!(queue = %queue, error = %e, "Failed to bump pending counter");
                    }
                }
                Err(source) => {
                    tracing::error!(
                        job_id = %job_id,
                        submitted,
                        error = %source,
                        "Unit submission failed",
                    );
                    let note = format!("not queued: {source}");
                    for unqueued in &tasks[submitted..] {
                        if let Err(e) = self.jobs.record_unit_failure(&unqueued.key(), &note, 0).await {
                            tracing::warn!(unit = %unqueued.key(), error = %e, "Failed to record unit failure");
                        }
                    }
                    return Err(DispatchError::Submission {
                        job_id,
                        submitted,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Read-only view of a job for polling clients.
    pub async fn poll(&self, job_id: JobId) -> Result<Option<JobSnapshot>, StoreError> {
        let Some(job) = self.jobs.find_job(job_id).await? else {
            return Ok(None);
        };
        let artifacts = self.jobs.list_artifacts(job_id).await?;
        let unit_failures = self.jobs.list_unit_failures(job_id).await?;

        Ok(Some(JobSnapshot {
            job_id: job.job_id,
            owner_id: job.owner_id,
            target_id: job.target_id,
            status: job.status,
            total_units: job.total_units,
            completed_units: job.completed_units,
            error: job.error,
            artifacts,
            unit_failures,
        }))
    }
}

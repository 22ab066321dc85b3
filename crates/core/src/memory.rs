//! In-process implementations of the engine ports.
//!
//! Each store serialises access through one `tokio::sync::Mutex`, which
//! gives the same per-call atomicity the Postgres adapters get from single
//! statements and transactions. Only usable when dispatcher and workers
//! share a process (tests, local runs).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::job::{
    status_after_progress, AppendOutcome, Artifact, Job, JobProgress, JobStatus, NewArtifact,
    NewJob, UnitFailure, UnitKey, UnitTask,
};
use crate::ports::{
    Admission, ClaimedTask, CreditGate, DebitOutcome, JobStore, QueueLoadStore, TaskHandle,
    TaskQueue, TaskState,
};
use crate::queue::{LoadCounter, LoadSnapshot, QueueLoad, QueueName};
use crate::types::{DbId, JobId};

// ---------------------------------------------------------------------------
// Queue loads
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryQueueLoadStore {
    loads: Mutex<LoadSnapshot>,
}

impl MemoryQueueLoadStore {
    /// Store with zeroed counters for `queues`.
    pub fn new(queues: &[QueueName]) -> Self {
        Self {
            loads: Mutex::new(
                queues
                    .iter()
                    .map(|q| (q.clone(), QueueLoad::default()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl QueueLoadStore for MemoryQueueLoadStore {
    async fn increment(&self, queue: &QueueName, counter: LoadCounter) -> Result<(), StoreError> {
        self.loads
            .lock()
            .await
            .entry(queue.clone())
            .or_default()
            .increment(counter);
        Ok(())
    }

    async fn decrement(&self, queue: &QueueName, counter: LoadCounter) -> Result<(), StoreError> {
        self.loads
            .lock()
            .await
            .entry(queue.clone())
            .or_default()
            .decrement(counter);
        Ok(())
    }

    async fn snapshot_all(&self) -> Result<LoadSnapshot, StoreError> {
        Ok(self.loads.lock().await.clone())
    }

    async fn reset(&self, queue: Option<&QueueName>) -> Result<(), StoreError> {
        let mut loads = self.loads.lock().await;
        match queue {
            Some(q) => {
                loads.insert(q.clone(), QueueLoad::default());
            }
            None => loads.values_mut().for_each(|l| *l = QueueLoad::default()),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct JobTables {
    jobs: HashMap<JobId, Job>,
    artifacts: Vec<Artifact>,
    artifact_keys: HashSet<UnitKey>,
    failures: HashMap<UnitKey, UnitFailure>,
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    tables: Mutex<JobTables>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job record verbatim, bypassing admission. Test fixture.
    pub async fn insert_job(&self, job: Job) {
        self.tables.lock().await.jobs.insert(job.job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.tables.lock().await.jobs.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn count_active_for_owner(&self, owner_id: DbId) -> Result<u32, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|j| j.owner_id == owner_id && j.status.is_active())
            .count() as u32)
    }

    async fn admit_job(
        &self,
        new: &NewJob,
        limit: u32,
        supersede_reason: &str,
    ) -> Result<Admission, StoreError> {
        let mut tables = self.tables.lock().await;

        let active = tables
            .jobs
            .values()
            .filter(|j| j.owner_id == new.owner_id && j.status.is_active())
            .count() as u32;
        if active >= limit {
            return Ok(Admission::OwnerAtLimit { active });
        }

        let now = Utc::now();
        let mut superseded = Vec::new();
        for job in tables.jobs.values_mut() {
            if job.target_id == new.target_id && job.status.is_active() {
                job.status = JobStatus::Failed;
                job.error = Some(supersede_reason.to_string());
                job.updated_at = now;
                superseded.push(job.job_id);
            }
        }

        let job = Job {
            job_id: new.job_id,
            owner_id: new.owner_id,
            target_id: new.target_id,
            total_units: new.total_units,
            completed_units: 0,
            status: JobStatus::Running,
            error: None,
            created_at: now,
            updated_at: now,
        };
        tables.jobs.insert(job.job_id, job.clone());
        Ok(Admission::Admitted { job, superseded })
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.tables.lock().await.jobs.get(&job_id).cloned())
    }

    async fn list_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .artifacts
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn artifact_exists(&self, key: &UnitKey) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.artifact_keys.contains(key))
    }

    async fn append_artifact(&self, new: &NewArtifact) -> Result<AppendOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.jobs.contains_key(&new.key.job_id) {
            return Err(StoreError::NotFound {
                entity: "Job",
                id: new.key.job_id.to_string(),
            });
        }
        if !tables.artifact_keys.insert(new.key.clone()) {
            return Ok(AppendOutcome::Duplicate);
        }

        let now = Utc::now();
        tables.artifacts.push(Artifact {
            job_id: new.key.job_id,
            unit_index: new.key.unit_index,
            unit_kind: new.key.unit_kind.clone(),
            location: new.location.clone(),
            created_at: now,
        });

        let job = tables
            .jobs
            .get_mut(&new.key.job_id)
            .ok_or_else(|| StoreError::Backend("job vanished during append".to_string()))?;
        if job.completed_units < job.total_units {
            job.completed_units += 1;
        }
        job.status = status_after_progress(job.status, job.completed_units, job.total_units);
        job.updated_at = now;

        Ok(AppendOutcome::Appended(JobProgress {
            completed_units: job.completed_units,
            total_units: job.total_units,
            status: job.status,
        }))
    }

    async fn record_unit_failure(
        &self,
        key: &UnitKey,
        error: &str,
        attempts: i32,
    ) -> Result<(), StoreError> {
        self.tables.lock().await.failures.insert(
            key.clone(),
            UnitFailure {
                job_id: key.job_id,
                unit_index: key.unit_index,
                unit_kind: key.unit_kind.clone(),
                error: error.to_string(),
                attempts,
                recorded_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_unit_failures(&self, job_id: JobId) -> Result<Vec<UnitFailure>, StoreError> {
        let tables = self.tables.lock().await;
        let mut failures: Vec<UnitFailure> = tables
            .failures
            .values()
            .filter(|f| f.job_id == job_id)
            .cloned()
            .collect();
        failures.sort_by(|a, b| {
            (a.unit_index, &a.unit_kind).cmp(&(b.unit_index, &b.unit_kind))
        });
        Ok(failures)
    }
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TaskRow {
    handle: TaskHandle,
    queue: QueueName,
    task: UnitTask,
    state: TaskState,
    attempts: u32,
    available_at: Instant,
    claimed_at: Option<Instant>,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct TaskTables {
    rows: Vec<TaskRow>,
    next_id: DbId,
}

impl TaskTables {
    /// The row `claim` still holds, if the task has not been reclaimed.
    fn claimed_row(&mut self, claim: &ClaimedTask) -> Option<&mut TaskRow> {
        self.rows.iter_mut().find(|r| {
            r.handle == claim.handle && r.state == TaskState::Running && r.attempts == claim.attempt
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    tables: Mutex<TaskTables>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submitted task with its queue, in submission order.
    pub async fn submitted(&self) -> Vec<(QueueName, UnitTask)> {
        self.tables
            .lock()
            .await
            .rows
            .iter()
            .map(|r| (r.queue.clone(), r.task.clone()))
            .collect()
    }

    /// Last error recorded against a task.
    pub async fn last_error(&self, handle: TaskHandle) -> Option<String> {
        let tables = self.tables.lock().await;
        tables
            .rows
            .iter()
            .find(|r| r.handle == handle)
            .and_then(|r| r.last_error.clone())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn submit(&self, queue: &QueueName, task: &UnitTask) -> Result<TaskHandle, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.next_id += 1;
        let handle = TaskHandle(tables.next_id);
        tables.rows.push(TaskRow {
            handle,
            queue: queue.clone(),
            task: task.clone(),
            state: TaskState::Queued,
            attempts: 0,
            available_at: Instant::now(),
            claimed_at: None,
            last_error: None,
        });
        Ok(handle)
    }

    async fn claim(&self, queues: &[QueueName], _worker: &str) -> Result<Option<ClaimedTask>, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Instant::now();
        let Some(row) = tables.rows.iter_mut().find(|r| {
            r.state == TaskState::Queued && r.available_at <= now && queues.contains(&r.queue)
        }) else {
            return Ok(None);
        };

        row.state = TaskState::Running;
        row.attempts += 1;
        row.claimed_at = Some(now);
        Ok(Some(ClaimedTask {
            handle: row.handle,
            queue: row.queue.clone(),
            task: row.task.clone(),
            attempt: row.attempts,
        }))
    }

    async fn complete(&self, claim: &ClaimedTask) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.claimed_row(claim) else {
            return Ok(false);
        };
        row.state = TaskState::Succeeded;
        Ok(true)
    }

    async fn retry(&self, claim: &ClaimedTask, delay: Duration, error: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.claimed_row(claim) else {
            return Ok(false);
        };
        row.state = TaskState::Queued;
        row.available_at = Instant::now() + delay;
        row.claimed_at = None;
        row.last_error = Some(error.to_string());
        Ok(true)
    }

    async fn fail(&self, claim: &ClaimedTask, error: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.claimed_row(claim) else {
            return Ok(false);
        };
        row.state = TaskState::Failed;
        row.last_error = Some(error.to_string());
        Ok(true)
    }

    async fn status(&self, handle: TaskHandle) -> Result<Option<TaskState>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.rows.iter().find(|r| r.handle == handle).map(|r| r.state))
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<Vec<QueueName>, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Instant::now();
        let mut requeued = Vec::new();
        for row in tables.rows.iter_mut() {
            let stale = row.state == TaskState::Running
                && row
                    .claimed_at
                    .is_some_and(|at| now.duration_since(at) >= older_than);
            if stale {
                row.state = TaskState::Queued;
                row.available_at = now;
                row.claimed_at = None;
                requeued.push(row.queue.clone());
            }
        }
        Ok(requeued)
    }
}

// ---------------------------------------------------------------------------
// Credits
// ---------------------------------------------------------------------------

/// Credit balances keyed by owner. Unknown owners have a zero balance.
#[derive(Debug, Default)]
pub struct MemoryCreditLedger {
    balances: Mutex<HashMap<DbId, i64>>,
}

impl MemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, owner_id: DbId, balance: i64) {
        self.balances.lock().await.insert(owner_id, balance);
    }

    pub async fn balance(&self, owner_id: DbId) -> i64 {
        self.balances
            .lock()
            .await
            .get(&owner_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CreditGate for MemoryCreditLedger {
    async fn debit(&self, owner_id: DbId, amount: i64) -> Result<DebitOutcome, StoreError> {
        let mut balances = self.balances.lock().await;
        let balance = balances.entry(owner_id).or_insert(0);
        if *balance < amount {
            return Ok(DebitOutcome::Insufficient { balance: *balance });
        }
        *balance -= amount;
        Ok(DebitOutcome::Debited {
            remaining: *balance,
        })
    }
}

//! End-to-end dispatch behaviour over the in-memory stores.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;

use batchforge_core::config::SchedulerConfig;
use batchforge_core::dispatcher::{DispatchError, JobDispatcher};
use batchforge_core::error::StoreError;
use batchforge_core::job::{
    AppendOutcome, Artifact, Job, JobStatus, NewArtifact, NewJob, UnitFailure, UnitKey,
    SUPERSEDED_REASON,
};
use batchforge_core::memory::{MemoryJobStore, MemoryQueueLoadStore, MemoryTaskQueue};
use batchforge_core::ports::{Admission, JobStore, QueueLoadStore};
use batchforge_core::types::{DbId, JobId};
use batchforge_core::unit_worker::{Settlement, UnitSuccess};
use common::{request, Harness, FOUR_KINDS};

fn active_job(owner_id: i64, target_id: i64) -> Job {
    let now = Utc::now();
    Job {
        job_id: uuid::Uuid::now_v7(),
        owner_id,
        target_id,
        total_units: 1,
        completed_units: 0,
        status: JobStatus::Running,
        error: None,
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// Decomposition and completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn twelve_unit_job_runs_to_completion() {
    let h = Harness::new();
    h.credits.set_balance(1, 100).await;

    let receipt = h
        .dispatcher
        .submit(&request(1, 7, 3, &FOUR_KINDS))
        .await
        .unwrap();
    assert_eq!(receipt.total_units, 12);
    assert!(receipt.superseded.is_empty());

    let submitted = h.tasks.submitted().await;
    assert_eq!(submitted.len(), 12);
    let keys: HashSet<_> = submitted.iter().map(|(_, t)| t.key()).collect();
    assert_eq!(keys.len(), 12);

    let snap = h.dispatcher.poll(receipt.job_id).await.unwrap().unwrap();
    assert_eq!(snap.status, JobStatus::Running);
    assert_eq!(snap.completed_units, 0);
    assert!(snap.artifacts.is_empty());

    let pending: i64 = h
        .loads
        .snapshot_all()
        .await
        .unwrap()
        .values()
        .map(|l| l.pending)
        .sum();
    assert_eq!(pending, 12);

    let settlements = h.drain().await;
    assert_eq!(settlements.len(), 12);
    assert!(settlements
        .iter()
        .all(|s| matches!(s, Settlement::Completed(UnitSuccess::Produced { .. }))));

    let snap = h.dispatcher.poll(receipt.job_id).await.unwrap().unwrap();
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.completed_units, 12);
    assert_eq!(snap.artifacts.len(), 12);
    assert!(snap.unit_failures.is_empty());
    assert_eq!(h.credits.balance(1).await, 88);

    let loads = h.loads.snapshot_all().await.unwrap();
    assert!(loads.values().all(|l| l.pending == 0 && l.running == 0));
}

#[tokio::test]
async fn units_spread_over_least_loaded_queues() {
    let h = Harness::new();
    h.dispatcher
        .submit(&request(1, 7, 3, &FOUR_KINDS))
        .await
        .unwrap();

    let queues: Vec<String> = h
        .tasks
        .submitted()
        .await
        .into_iter()
        .map(|(q, _)| q.to_string())
        .collect();

    // With 20 idle queues each unit lands on a fresh queue, in name order.
    assert_eq!(queues[0], "queue_0");
    assert_eq!(queues[1], "queue_1");
    assert_eq!(queues[2], "queue_10");
    assert_eq!(queues.iter().collect::<HashSet<_>>().len(), 12);
}

#[tokio::test]
async fn job_is_not_completed_before_last_unit() {
    let h = Harness::new();
    h.credits.set_balance(1, 100).await;
    let receipt = h
        .dispatcher
        .submit(&request(1, 7, 3, &FOUR_KINDS))
        .await
        .unwrap();

    h.drain_at_most(11).await;
    let snap = h.dispatcher.poll(receipt.job_id).await.unwrap().unwrap();
    assert_eq!(snap.completed_units, 11);
    assert_eq!(snap.status, JobStatus::Running);

    h.drain().await;
    let snap = h.dispatcher.poll(receipt.job_id).await.unwrap().unwrap();
    assert_eq!(snap.status, JobStatus::Completed);
}

#[tokio::test]
async fn zero_unit_request_is_rejected_without_side_effects() {
    let h = Harness::new();

    let err = h
        .dispatcher
        .submit(&request(1, 7, 0, &FOUR_KINDS))
        .await
        .unwrap_err();
    assert_matches!(err, DispatchError::NoUnitsToGenerate);

    let err = h.dispatcher.submit(&request(1, 7, 3, &[])).await.unwrap_err();
    assert_matches!(err, DispatchError::NoUnitsToGenerate);

    assert_eq!(h.jobs.job_count().await, 0);
    assert!(h.tasks.submitted().await.is_empty());
}

#[tokio::test]
async fn duplicate_kinds_are_invalid() {
    let h = Harness::new();
    let err = h
        .dispatcher
        .submit(&request(1, 7, 2, &["front", "front"]))
        .await
        .unwrap_err();
    assert_matches!(err, DispatchError::InvalidRequest(_));
    assert_eq!(h.jobs.job_count().await, 0);
}

// ---------------------------------------------------------------------------
// Concurrency ceiling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn owner_with_four_active_jobs_is_rejected() {
    let h = Harness::new();
    for target in 1..=4 {
        h.jobs.insert_job(active_job(9, target)).await;
    }

    let err = h
        .dispatcher
        .submit(&request(9, 50, 1, &["front"]))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        DispatchError::TooManyActiveJobs {
            owner_id: 9,
            active: 4,
            limit: 3
        }
    );
    assert_eq!(h.jobs.job_count().await, 4);
    assert!(h.tasks.submitted().await.is_empty());
}

#[tokio::test]
async fn ceiling_applies_at_the_limit() {
    let h = Harness::new();
    for target in 1..=3 {
        h.dispatcher
            .submit(&request(9, target, 1, &["front"]))
            .await
            .unwrap();
    }
    assert_matches!(
        h.dispatcher.submit(&request(9, 4, 1, &["front"])).await,
        Err(DispatchError::TooManyActiveJobs { active: 3, .. })
    );

    // Other owners are unaffected.
    assert!(h.dispatcher.submit(&request(10, 4, 1, &["front"])).await.is_ok());
}

#[tokio::test]
async fn finished_jobs_free_a_slot() {
    let h = Harness::new();
    h.credits.set_balance(9, 10).await;
    for target in 1..=3 {
        h.dispatcher
            .submit(&request(9, target, 1, &["front"]))
            .await
            .unwrap();
    }
    h.drain().await;
    assert!(h.dispatcher.submit(&request(9, 4, 1, &["front"])).await.is_ok());
}

/// Job store whose owner count is slow, so concurrent submissions all read
/// it before any of them is admitted.
struct SlowCountJobStore(MemoryJobStore);

#[async_trait]
impl JobStore for SlowCountJobStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.0.health_check().await
    }

    async fn count_active_for_owner(&self, owner_id: DbId) -> Result<u32, StoreError> {
        let active = self.0.count_active_for_owner(owner_id).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(active)
    }

    async fn admit_job(
        &self,
        job: &NewJob,
        limit: u32,
        supersede_reason: &str,
    ) -> Result<Admission, StoreError> {
        self.0.admit_job(job, limit, supersede_reason).await
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        self.0.find_job(job_id).await
    }

    async fn list_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError> {
        self.0.list_artifacts(job_id).await
    }

    async fn artifact_exists(&self, key: &UnitKey) -> Result<bool, StoreError> {
        self.0.artifact_exists(key).await
    }

    async fn append_artifact(&self, artifact: &NewArtifact) -> Result<AppendOutcome, StoreError> {
        self.0.append_artifact(artifact).await
    }

    async fn record_unit_failure(
        &self,
        key: &UnitKey,
        error: &str,
        attempts: i32,
    ) -> Result<(), StoreError> {
        self.0.record_unit_failure(key, error, attempts).await
    }

    async fn list_unit_failures(&self, job_id: JobId) -> Result<Vec<UnitFailure>, StoreError> {
        self.0.list_unit_failures(job_id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_cannot_exceed_ceiling() {
    let config = SchedulerConfig::default();
    let jobs = Arc::new(SlowCountJobStore(MemoryJobStore::new()));
    let tasks = Arc::new(MemoryTaskQueue::new());
    let dispatcher = JobDispatcher::new(
        jobs.clone(),
        tasks.clone(),
        Arc::new(MemoryQueueLoadStore::new(&config.queues())),
        config,
    );

    let handles: Vec<_> = (1..=8)
        .map(|target| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit(&request(1, target, 1, &["front"])).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert_matches!(e, DispatchError::TooManyActiveJobs { limit: 3, .. }),
        }
    }

    assert_eq!(accepted, 3);
    assert_eq!(jobs.0.count_active_for_owner(1).await.unwrap(), 3);
    assert_eq!(tasks.submitted().await.len(), 3, "rejected submissions queue nothing");
}

// ---------------------------------------------------------------------------
// Supersession
// ---------------------------------------------------------------------------

#[tokio::test]
async fn newer_batch_supersedes_running_job() {
    let h = Harness::new();
    let a = h
        .dispatcher
        .submit(&request(1, 7, 2, &["front"]))
        .await
        .unwrap();
    let b = h
        .dispatcher
        .submit(&request(1, 7, 2, &["front"]))
        .await
        .unwrap();

    assert_eq!(b.superseded, vec![a.job_id]);

    let job_a = h.jobs.find_job(a.job_id).await.unwrap().unwrap();
    assert_eq!(job_a.status, JobStatus::Failed);
    assert_eq!(job_a.error.as_deref(), Some(SUPERSEDED_REASON));
    assert!(job_a.error.unwrap().starts_with("superseded"));

    let job_b = h.jobs.find_job(b.job_id).await.unwrap().unwrap();
    assert_eq!(job_b.status, JobStatus::Running);
    assert_eq!(h.jobs.count_active_for_owner(1).await.unwrap(), 1);
}

#[tokio::test]
async fn supersession_ignores_other_targets() {
    let h = Harness::new();
    let a = h
        .dispatcher
        .submit(&request(1, 7, 1, &["front"]))
        .await
        .unwrap();
    let b = h
        .dispatcher
        .submit(&request(1, 8, 1, &["front"]))
        .await
        .unwrap();

    assert!(b.superseded.is_empty());
    let job_a = h.jobs.find_job(a.job_id).await.unwrap().unwrap();
    assert_eq!(job_a.status, JobStatus::Running);
}

#[tokio::test]
async fn stragglers_of_superseded_job_are_kept_but_do_not_resurrect_it() {
    let h = Harness::new();
    h.credits.set_balance(1, 100).await;

    let a = h
        .dispatcher
        .submit(&request(1, 7, 2, &["front"]))
        .await
        .unwrap();
    let b = h
        .dispatcher
        .submit(&request(1, 7, 2, &["front"]))
        .await
        .unwrap();

    // A's units were already dispatched and still run to the end.
    h.drain().await;

    let snap_a = h.dispatcher.poll(a.job_id).await.unwrap().unwrap();
    assert_eq!(snap_a.status, JobStatus::Failed);
    assert_eq!(snap_a.artifacts.len(), 2, "artifacts kept for audit");

    let snap_b = h.dispatcher.poll(b.job_id).await.unwrap().unwrap();
    assert_eq!(snap_b.status, JobStatus::Completed);
    assert_eq!(snap_b.artifacts.len(), 2);
}

#[tokio::test]
async fn unknown_job_polls_as_none() {
    let h = Harness::new();
    assert!(h
        .dispatcher
        .poll(uuid::Uuid::now_v7())
        .await
        .unwrap()
        .is_none());
}

//! `PgJobStore` against a migrated database.

use assert_matches::assert_matches;
use sqlx::PgPool;

use batchforge_core::error::StoreError;
use batchforge_core::job::{
    AppendOutcome, Job, JobStatus, NewArtifact, NewJob, UnitKey, SUPERSEDED_REASON,
};
use batchforge_core::ports::{Admission, JobStore};
use batchforge_db::repositories::JobRepo;
use batchforge_db::stores::{store_error, PgJobStore};

fn new_job(owner_id: i64, target_id: i64, total_units: i32) -> NewJob {
    NewJob {
        job_id: uuid::Uuid::now_v7(),
        owner_id,
        target_id,
        total_units,
    }
}

/// Admit `job` with a ceiling high enough never to interfere.
async fn create(store: &PgJobStore, job: &NewJob) -> Job {
    match store.admit_job(job, 100, SUPERSEDED_REASON).await.unwrap() {
        Admission::Admitted { job, .. } => job,
        other => panic!("expected admission, got {other:?}"),
    }
}

fn artifact(job_id: uuid::Uuid, index: i32, kind: &str) -> NewArtifact {
    NewArtifact {
        key: UnitKey {
            job_id,
            unit_index: index,
            unit_kind: kind.to_string(),
        },
        location: format!("s3://bucket/{job_id}/{index}/{kind}"),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_admitted_job_starts_running(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = create(&store, &new_job(1, 10, 12)).await;

    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.completed_units, 0);
    assert_eq!(job.total_units, 12);
    assert_eq!(store.count_active_for_owner(1).await.unwrap(), 1);
    assert_eq!(store.count_active_for_owner(2).await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_second_active_job_for_target_conflicts(pool: PgPool) {
    let first = new_job(1, 10, 1);
    JobRepo::create(&pool, first.job_id, 1, 10, 1).await.unwrap();

    let second = new_job(2, 10, 1);
    let err = JobRepo::create(&pool, second.job_id, 2, 10, 1)
        .await
        .map_err(store_error)
        .unwrap_err();
    assert_matches!(err, StoreError::Conflict { constraint } if constraint == "uq_jobs_active_target");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_admission_supersedes_only_the_same_target(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let old = create(&store, &new_job(1, 10, 2)).await;
    let other = create(&store, &new_job(1, 11, 2)).await;

    let outcome = store
        .admit_job(&new_job(2, 10, 2), 3, SUPERSEDED_REASON)
        .await
        .unwrap();
    assert_matches!(outcome, Admission::Admitted { superseded, .. } if superseded == vec![old.job_id]);

    let old = store.find_job(old.job_id).await.unwrap().unwrap();
    assert_eq!(old.status, JobStatus::Failed);
    assert_eq!(old.error.as_deref(), Some(SUPERSEDED_REASON));

    let other = store.find_job(other.job_id).await.unwrap().unwrap();
    assert_eq!(other.status, JobStatus::Running);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_admission_at_limit_changes_nothing(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let existing = create(&store, &new_job(1, 10, 2)).await;
    create(&store, &new_job(1, 11, 2)).await;

    let outcome = store
        .admit_job(&new_job(1, 10, 2), 2, SUPERSEDED_REASON)
        .await
        .unwrap();
    assert_matches!(outcome, Admission::OwnerAtLimit { active: 2 });

    // The job on the requested target was not superseded.
    let existing = store.find_job(existing.job_id).await.unwrap().unwrap();
    assert_eq!(existing.status, JobStatus::Running);
    assert_eq!(store.count_active_for_owner(1).await.unwrap(), 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_admissions_respect_owner_limit(pool: PgPool) {
    let store = PgJobStore::new(pool);

    let handles: Vec<_> = (0..8)
        .map(|target| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .admit_job(&new_job(1, 100 + target, 1), 3, SUPERSEDED_REASON)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), Admission::Admitted { .. }) {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 3);
    assert_eq!(store.count_active_for_owner(1).await.unwrap(), 3);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_append_is_idempotent_per_unit(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = create(&store, &new_job(1, 10, 2)).await;
    let first = artifact(job.job_id, 0, "front");

    assert!(!store.artifact_exists(&first.key).await.unwrap());
    assert_matches!(
        store.append_artifact(&first).await.unwrap(),
        AppendOutcome::Appended(p) if p.completed_units == 1 && p.status == JobStatus::Running
    );
    assert!(store.artifact_exists(&first.key).await.unwrap());
    assert_eq!(
        store.append_artifact(&first).await.unwrap(),
        AppendOutcome::Duplicate
    );

    let job_row = store.find_job(job.job_id).await.unwrap().unwrap();
    assert_eq!(job_row.completed_units, 1);
    assert_eq!(store.list_artifacts(job.job_id).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_last_unit_completes_job(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = create(&store, &new_job(1, 10, 2)).await;

    store.append_artifact(&artifact(job.job_id, 0, "front")).await.unwrap();
    let outcome = store
        .append_artifact(&artifact(job.job_id, 0, "back"))
        .await
        .unwrap();
    assert_matches!(outcome, AppendOutcome::Appended(p) if p.status == JobStatus::Completed);

    let artifacts = store.list_artifacts(job.job_id).await.unwrap();
    let kinds: Vec<&str> = artifacts.iter().map(|a| a.unit_kind.as_str()).collect();
    assert_eq!(kinds, ["front", "back"]);
    assert_eq!(store.count_active_for_owner(1).await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_superseded_job_is_not_resurrected(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = create(&store, &new_job(1, 10, 1)).await;
    create(&store, &new_job(1, 10, 1)).await;

    let outcome = store
        .append_artifact(&artifact(job.job_id, 0, "front"))
        .await
        .unwrap();
    assert_matches!(outcome, AppendOutcome::Appended(p) if p.status == JobStatus::Failed);

    let job = store.find_job(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.completed_units, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_append_for_unknown_job_is_not_found(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let err = store
        .append_artifact(&artifact(uuid::Uuid::now_v7(), 0, "front"))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::NotFound { entity: "Job", .. });
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_appends_store_one_artifact(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = create(&store, &new_job(1, 10, 1)).await;
    let unit = artifact(job.job_id, 0, "front");

    let (a, b) = tokio::join!(store.append_artifact(&unit), store.append_artifact(&unit));
    let outcomes = [a.unwrap(), b.unwrap()];
    let appended = outcomes
        .iter()
        .filter(|o| matches!(o, AppendOutcome::Appended(_)))
        .count();
    assert_eq!(appended, 1);

    let job = store.find_job(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.completed_units, 1);
    assert_eq!(job.status, JobStatus::Completed);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_unit_failure_upsert_keeps_one_row(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = create(&store, &new_job(1, 10, 2)).await;
    let key = artifact(job.job_id, 1, "side").key;

    store.record_unit_failure(&key, "synthesis: timeout", 2).await.unwrap();
    store.record_unit_failure(&key, "synthesis: timeout again", 3).await.unwrap();

    let failures = store.list_unit_failures(job.job_id).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 3);
    assert_eq!(failures[0].error, "synthesis: timeout again");
}

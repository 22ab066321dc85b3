#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use batchforge_core::config::SchedulerConfig;
use batchforge_core::dispatcher::{JobDispatcher, JobRequest};
use batchforge_core::job::{JobDimensions, UnitTask};
use batchforge_core::memory::{
    MemoryCreditLedger, MemoryJobStore, MemoryQueueLoadStore, MemoryTaskQueue,
};
use batchforge_core::ports::{SynthesisError, SynthesizedArtifact, Synthesizer, TaskQueue};
use batchforge_core::retry::RetryPolicy;
use batchforge_core::types::DbId;
use batchforge_core::unit_worker::{Settlement, UnitWorker};

/// Synthesizer whose failures are scripted per unit kind.
#[derive(Default)]
pub struct ScriptedSynthesizer {
    calls: AtomicUsize,
    transient_failures: Mutex<HashMap<String, u32>>,
    rejected_kinds: Mutex<HashSet<String>>,
    barrier: Option<Barrier>,
}

impl ScriptedSynthesizer {
    /// Every call waits until `parties` calls are in flight.
    pub fn with_barrier(parties: usize) -> Self {
        Self {
            barrier: Some(Barrier::new(parties)),
            ..Default::default()
        }
    }

    /// Fail the next `times` calls for `kind` with a transient error.
    pub fn fail_kind(&self, kind: &str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(kind.to_string(), times);
    }

    pub fn reject_kind(&self, kind: &str) {
        self.rejected_kinds.lock().unwrap().insert(kind.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, task: &UnitTask) -> Result<SynthesizedArtifact, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }

        if self.rejected_kinds.lock().unwrap().contains(&task.unit_kind) {
            return Err(SynthesisError::Rejected(format!("{} refused", task.unit_kind)));
        }
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&task.unit_kind) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SynthesisError::Transient("model timed out".into()));
                }
            }
        }

        Ok(SynthesizedArtifact {
            location: format!(
                "mem://{}/{}/{}",
                task.job_id, task.unit_index, task.unit_kind
            ),
        })
    }
}

/// Dispatcher and worker wired to in-memory stores.
pub struct Harness {
    pub jobs: Arc<MemoryJobStore>,
    pub tasks: Arc<MemoryTaskQueue>,
    pub loads: Arc<MemoryQueueLoadStore>,
    pub credits: Arc<MemoryCreditLedger>,
    pub synthesizer: Arc<ScriptedSynthesizer>,
    pub dispatcher: JobDispatcher,
    pub worker: UnitWorker,
    pub config: SchedulerConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_synthesizer(ScriptedSynthesizer::default())
    }

    pub fn with_synthesizer(synthesizer: ScriptedSynthesizer) -> Self {
        let config = SchedulerConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        };
        let jobs = Arc::new(MemoryJobStore::new());
        let tasks = Arc::new(MemoryTaskQueue::new());
        let loads = Arc::new(MemoryQueueLoadStore::new(&config.queues()));
        let credits = Arc::new(MemoryCreditLedger::new());
        let synthesizer = Arc::new(synthesizer);

        let dispatcher = JobDispatcher::new(
            jobs.clone(),
            tasks.clone(),
            loads.clone(),
            config.clone(),
        );
        let worker = UnitWorker::new(
            jobs.clone(),
            loads.clone(),
            credits.clone(),
            synthesizer.clone(),
        );

        Self {
            jobs,
            tasks,
            loads,
            credits,
            synthesizer,
            dispatcher,
            worker,
            config,
        }
    }

    /// Claim and process tasks until every queue is empty.
    pub async fn drain(&self) -> Vec<Settlement> {
        self.drain_at_most(usize::MAX).await
    }

    pub async fn drain_at_most(&self, limit: usize) -> Vec<Settlement> {
        let queues = self.config.queues();
        let mut settlements = Vec::new();
        while settlements.len() < limit {
            let Some(claimed) = self.tasks.claim(&queues, "test-worker").await.unwrap() else {
                break;
            };
            settlements.push(
                self.worker
                    .process(&claimed, self.tasks.as_ref(), &self.config.retry)
                    .await,
            );
        }
        settlements
    }
}

pub fn request(owner_id: DbId, target_id: DbId, items: usize, kinds: &[&str]) -> JobRequest {
    JobRequest {
        owner_id,
        target_id,
        dimensions: JobDimensions {
            item_ids: (1..=items as DbId).map(|i| i * 100).collect(),
            unit_kinds: kinds.iter().map(|k| k.to_string()).collect(),
        },
    }
}

pub const FOUR_KINDS: [&str; 4] = ["front", "side", "back", "detail"];

//! Job, unit task and artifact types plus the job state machine.
//!
//! A bulk request becomes one [`Job`] and `items x unit_kinds` [`UnitTask`]s.
//! Each unit is addressed by its [`UnitKey`] `(job_id, unit_index,
//! unit_kind)`, which is also the idempotency key for its artifact.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, JobId, Timestamp};

/// Failure reason stamped on a job replaced by a newer one for its target.
pub const SUPERSEDED_REASON: &str = "superseded by newer batch";

/// Maximum length of a unit kind label.
const MAX_UNIT_KIND_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Job status state machine
// ---------------------------------------------------------------------------

/// Lifecycle of a job.
///
/// ```text
/// pending --> running --> completed
///    |           |
///    +-----------+------> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Pending and running jobs count towards the per-owner ceiling and can
    /// be superseded.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> to` is an allowed transition. Nothing leaves a
    /// terminal state.
    pub fn can_transition(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status a job should hold after its completed-unit counter moved to
/// `completed_units`.
///
/// Only a running job completes, and only when every unit reported in.
/// A failed (superseded) job keeps its status even if stragglers finish.
pub fn status_after_progress(current: JobStatus, completed_units: i32, total_units: i32) -> JobStatus {
    if current == JobStatus::Running && completed_units >= total_units {
        JobStatus::Completed
    } else {
        current
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Aggregate tracking record of one bulk request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job_id: JobId,
    pub owner_id: DbId,
    pub target_id: DbId,
    pub total_units: i32,
    pub completed_units: i32,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for persisting a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: JobId,
    pub owner_id: DbId,
    pub target_id: DbId,
    pub total_units: i32,
}

/// Counter state returned after a progress increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub completed_units: i32,
    pub total_units: i32,
    pub status: JobStatus,
}

/// Identity of one unit inside a job; at most one artifact per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub job_id: JobId,
    pub unit_index: i32,
    pub unit_kind: String,
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.job_id, self.unit_index, self.unit_kind)
    }
}

/// Message submitted to the task queue for one unit.
///
/// Carries everything a worker needs; the job record is only read to
/// confirm the job still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTask {
    pub job_id: JobId,
    pub owner_id: DbId,
    pub target_id: DbId,
    /// Item this unit renders, addressed by id rather than position.
    pub item_id: DbId,
    /// Position of `item_id` within the request.
    pub unit_index: i32,
    pub unit_kind: String,
}

impl UnitTask {
    pub fn key(&self) -> UnitKey {
        UnitKey {
            job_id: self.job_id,
            unit_index: self.unit_index,
            unit_kind: self.unit_kind.clone(),
        }
    }
}

/// A produced artifact, appended to its job's artifact list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub job_id: JobId,
    pub unit_index: i32,
    pub unit_kind: String,
    pub location: String,
    pub created_at: Timestamp,
}

/// Input for appending an artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub key: UnitKey,
    pub location: String,
}

/// Result of an artifact append guarded by the unit uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The artifact was stored and the job counter moved.
    Appended(JobProgress),
    /// Another delivery already stored an artifact for this key.
    Duplicate,
}

/// Terminal failure note for one unit, kept next to the job's artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFailure {
    pub job_id: JobId,
    pub unit_index: i32,
    pub unit_kind: String,
    pub error: String,
    pub attempts: i32,
    pub recorded_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

/// The dimensions of a bulk request: every item is rendered once per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDimensions {
    pub item_ids: Vec<DbId>,
    pub unit_kinds: Vec<String>,
}

impl JobDimensions {
    /// Cartesian product size.
    pub fn total_units(&self) -> usize {
        self.item_ids.len() * self.unit_kinds.len()
    }

    /// Check kinds are usable as idempotency-key components.
    ///
    /// Empty dimensions are not an error here; the dispatcher reports them
    /// as "no units to generate".
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::with_capacity(self.unit_kinds.len());
        for (i, kind) in self.unit_kinds.iter().enumerate() {
            if kind.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "Unit kind at index {i} must not be empty"
                )));
            }
            if kind.len() > MAX_UNIT_KIND_LEN {
                return Err(CoreError::Validation(format!(
                    "Unit kind at index {i} exceeds {MAX_UNIT_KIND_LEN} characters"
                )));
            }
            if !seen.insert(kind.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate unit kind: \"{kind}\""
                )));
            }
        }
        if i32::try_from(self.total_units()).is_err() {
            return Err(CoreError::Validation(
                "Request produces too many units".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand into one task per `(item, kind)` pair, item-major.
    pub fn decompose(&self, job_id: JobId, owner_id: DbId, target_id: DbId) -> Vec<UnitTask> {
        let mut tasks = Vec::with_capacity(self.total_units());
        for (index, item_id) in self.item_ids.iter().enumerate() {
            for kind in &self.unit_kinds {
                tasks.push(UnitTask {
                    job_id,
                    owner_id,
                    target_id,
                    item_id: *item_id,
                    unit_index: index as i32,
                    unit_kind: kind.clone(),
                });
            }
        }
        tasks
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Logical queue naming, load counters, and least-loaded selection.
//!
//! Queues are plain lanes for spreading unit tasks across workers; they
//! carry no priority or ordering semantics. Each queue has two shared
//! counters (`pending`, `running`) whose sum is the only ranking key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Every logical queue is named `queue_<n>`.
pub const QUEUE_NAME_PREFIX: &str = "queue_";

// ---------------------------------------------------------------------------
// Queue names
// ---------------------------------------------------------------------------

/// Stable identifier of a logical queue.
///
/// Ordering is plain string ordering, which is what tie-breaking uses
/// (`queue_10` sorts before `queue_2`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of the queue at position `index`.
    pub fn indexed(index: usize) -> Self {
        Self(format!("{QUEUE_NAME_PREFIX}{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Names of all `count` queues configured at process start.
pub fn queue_names(count: usize) -> Vec<QueueName> {
    (0..count).map(QueueName::indexed).collect()
}

/// Parse a user-supplied queue name and check it belongs to the configured
/// set of `count` queues.
pub fn parse_queue_name(raw: &str, count: usize) -> Result<QueueName, CoreError> {
    let index = raw
        .strip_prefix(QUEUE_NAME_PREFIX)
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "Invalid queue name '{raw}', expected {QUEUE_NAME_PREFIX}<n>"
            ))
        })?;

    // Reject aliases such as `queue_01`.
    if index >= count || QueueName::indexed(index).as_str() != raw {
        return Err(CoreError::Validation(format!(
            "Unknown queue '{raw}' ({count} queues configured)"
        )));
    }
    Ok(QueueName::indexed(index))
}

// ---------------------------------------------------------------------------
// Load counters
// ---------------------------------------------------------------------------

/// Which of the two per-queue counters an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadCounter {
    Pending,
    Running,
}

impl LoadCounter {
    /// Column holding this counter in the `queue_loads` table.
    pub fn column(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
        }
    }
}

/// Point-in-time counters of one queue. Both values are never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLoad {
    pub pending: i64,
    pub running: i64,
}

impl QueueLoad {
    pub fn total(&self) -> i64 {
        self.pending + self.running
    }

    pub fn get(&self, counter: LoadCounter) -> i64 {
        match counter {
            LoadCounter::Pending => self.pending,
            LoadCounter::Running => self.running,
        }
    }

    pub fn increment(&mut self, counter: LoadCounter) {
        *self.slot(counter) += 1;
    }

    /// Decrement, clamping at zero. A worker that crashed before its own
    /// decrement leaves the counter high; it must never go negative.
    pub fn decrement(&mut self, counter: LoadCounter) {
        let slot = self.slot(counter);
        *slot = (*slot - 1).max(0);
    }

    fn slot(&mut self, counter: LoadCounter) -> &mut i64 {
        match counter {
            LoadCounter::Pending => &mut self.pending,
            LoadCounter::Running => &mut self.running,
        }
    }
}

/// Counters of every queue, ordered by queue name.
pub type LoadSnapshot = BTreeMap<QueueName, QueueLoad>;

/// Pick the queue with the smallest `pending + running`.
///
/// Ties go to the lexicographically smallest name. Returns `None` only for
/// an empty snapshot.
pub fn least_loaded(snapshot: &LoadSnapshot) -> Option<&QueueName> {
    // BTreeMap iterates in name order and `min_by_key` keeps the first
    // minimum, which gives the tie-break for free.
    snapshot
        .iter()
        .min_by_key(|(_, load)| load.total())
        .map(|(name, _)| name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Unit execution worker.
//!
//! Runs a pool of slots that claim unit tasks from the shared task queue and
//! push them through [`batchforge_core::unit_worker::UnitWorker`], plus the
//! reaper that redelivers tasks orphaned by crashed workers.

pub mod config;
pub mod reaper;
pub mod runtime;
pub mod synthesis;

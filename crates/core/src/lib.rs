//! Scheduling and admission-control core for bulk generation jobs.
//!
//! Domain types, the job state machine, queue selection and the two engine
//! entry points, [`dispatcher::JobDispatcher`] and
//! [`unit_worker::UnitWorker`]. Storage and external collaborators are
//! reached only through the traits in [`ports`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod memory;
pub mod ports;
pub mod queue;
pub mod retry;
pub mod selector;
pub mod types;
pub mod unit_worker;

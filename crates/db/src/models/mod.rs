//! Row structs matching the database tables.
//!
//! Each row converts into its `batchforge_core` domain type; status ids are
//! translated through [`status`].

pub mod artifact;
pub mod job;
pub mod queue_load;
pub mod status;
pub mod unit_task;

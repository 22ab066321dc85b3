//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Statements that also run inside
//! a transaction take any `PgExecutor` instead.

pub mod artifact_repo;
pub mod credit_repo;
pub mod job_repo;
pub mod queue_load_repo;
pub mod unit_failure_repo;
pub mod unit_task_repo;

pub use artifact_repo::ArtifactRepo;
pub use credit_repo::CreditRepo;
pub use job_repo::JobRepo;
pub use queue_load_repo::QueueLoadRepo;
pub use unit_failure_repo::UnitFailureRepo;
pub use unit_task_repo::UnitTaskRepo;

//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

use batchforge_core::error::StoreError;
use batchforge_core::job::JobStatus as DomainJobStatus;
use batchforge_core::ports::TaskState;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up the variant for a database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( v if v == $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Job lifecycle status.
    JobStatus {
        Pending = 1,
        Running = 2,
        Completed = 3,
        Failed = 4,
    }
}

define_status_enum! {
    /// Delivery status of a row in `unit_tasks`.
    UnitTaskStatus {
        Queued = 1,
        Running = 2,
        Succeeded = 3,
        Failed = 4,
    }
}

/// Statuses counted towards the owner ceiling and subject to supersession.
pub const ACTIVE_JOB_STATUSES: [StatusId; 2] = [
    JobStatus::Pending as StatusId,
    JobStatus::Running as StatusId,
];

impl From<DomainJobStatus> for JobStatus {
    fn from(value: DomainJobStatus) -> Self {
        match value {
            DomainJobStatus::Pending => Self::Pending,
            DomainJobStatus::Running => Self::Running,
            DomainJobStatus::Completed => Self::Completed,
            DomainJobStatus::Failed => Self::Failed,
        }
    }
}

impl From<JobStatus> for DomainJobStatus {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Pending => Self::Pending,
            JobStatus::Running => Self::Running,
            JobStatus::Completed => Self::Completed,
            JobStatus::Failed => Self::Failed,
        }
    }
}

impl From<UnitTaskStatus> for TaskState {
    fn from(value: UnitTaskStatus) -> Self {
        match value {
            UnitTaskStatus::Queued => Self::Queued,
            UnitTaskStatus::Running => Self::Running,
            UnitTaskStatus::Succeeded => Self::Succeeded,
            UnitTaskStatus::Failed => Self::Failed,
        }
    }
}

/// Decode a `jobs.status_id` into the domain status.
pub fn job_status_from_id(id: StatusId) -> Result<DomainJobStatus, StoreError> {
    JobStatus::from_id(id)
        .map(Into::into)
        .ok_or_else(|| StoreError::Backend(format!("unknown job status id {id}")))
}

/// Decode a `unit_tasks.status_id` into the task state.
pub fn task_state_from_id(id: StatusId) -> Result<TaskState, StoreError> {
    UnitTaskStatus::from_id(id)
        .map(Into::into)
        .ok_or_else(|| StoreError::Backend(format!("unknown unit task status id {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(JobStatus::Pending.id(), 1);
        assert_eq!(JobStatus::Running.id(), 2);
        assert_eq!(JobStatus::Completed.id(), 3);
        assert_eq!(JobStatus::Failed.id(), 4);
    }

    #[test]
    fn unit_task_status_ids_match_seed_data() {
        assert_eq!(UnitTaskStatus::Queued.id(), 1);
        assert_eq!(UnitTaskStatus::Running.id(), 2);
        assert_eq!(UnitTaskStatus::Succeeded.id(), 3);
        assert_eq!(UnitTaskStatus::Failed.id(), 4);
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = JobStatus::Failed.into();
        assert_eq!(id, 4);
    }

    #[test]
    fn domain_status_round_trips_through_id() {
        for status in [
            DomainJobStatus::Pending,
            DomainJobStatus::Running,
            DomainJobStatus::Completed,
            DomainJobStatus::Failed,
        ] {
            let id = JobStatus::from(status).id();
            assert_eq!(job_status_from_id(id).unwrap(), status);
        }
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert!(job_status_from_id(0).is_err());
        assert!(task_state_from_id(9).is_err());
    }
}

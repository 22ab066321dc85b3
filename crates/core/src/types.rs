/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Jobs are addressed by a UUIDv7 minted at dispatch time.
pub type JobId = uuid::Uuid;

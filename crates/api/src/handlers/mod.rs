pub mod jobs;
pub mod queues;

pub use {
    error::{DecodeError, Error},
    job::{BlockJob, Job, JobStatus, JobType, LogJob, QueueName, block_job_id, log_job_id},
};

pub mod error;
pub mod gas;
pub mod job;
pub mod primitives;

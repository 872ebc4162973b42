//! Typed job payloads and queue naming.
//!
//! A job travels the queue as JSON tagged by `job_type`, so the payload of
//! a block job is `{"job_type": "process_block", ...}` and a log job is
//! `{"job_type": "process_log", ...}`. The two variants of [`Job`] mirror
//! that wire shape exactly.

use serde::{Deserialize, Serialize};

/// The named FIFO queues work is distributed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Blocks,
    Logs,
}

impl QueueName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Logs => "logs",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminates dead-letter rows and redrive requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "process_block")]
    Block,
    #[serde(rename = "process_log")]
    Log,
}

impl JobType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "process_block",
            Self::Log => "process_log",
        }
    }

    /// The queue this kind of job is consumed from.
    pub const fn queue(&self) -> QueueName {
        match self {
            Self::Block => QueueName::Blocks,
            Self::Log => QueueName::Logs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    New,
    Retrying,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum Job {
    #[serde(rename = "process_block")]
    Block(BlockJob),
    #[serde(rename = "process_log")]
    Log(LogJob),
}

/// One block to ingest. Backfilled jobs carry an empty `block_hash`; the
/// processor canonicalizes against `eth_getBlockByNumber`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockJob {
    pub block_number: u64,
    pub block_hash: String,
    #[serde(default)]
    pub status: JobStatus,
}

/// One decoded log event, denormalized so the processor needs no further
/// chain access for the event body itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogJob {
    pub address: String,
    pub block_number: u64,
    pub block_hash: String,
    pub block_timestamp: Option<u64>,
    pub data: String,
    pub log_index: u64,
    pub topics: Vec<String>,
    pub transaction_hash: String,
    pub transaction_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl Job {
    pub const fn job_type(&self) -> JobType {
        match self {
            Self::Block(_) => JobType::Block,
            Self::Log(_) => JobType::Log,
        }
    }

    pub fn job_id(&self) -> String {
        match self {
            Self::Block(job) => block_job_id(job.block_number),
            Self::Log(job) => log_job_id(&job.transaction_hash, job.log_index),
        }
    }

    pub fn is_retry(&self) -> bool {
        match self {
            Self::Block(job) => job.status == JobStatus::Retrying,
            Self::Log(job) => job.status == Some(JobStatus::Retrying),
        }
    }

    /// Stamps the payload for republication from the dead-letter table.
    pub fn into_retrying(mut self) -> Self {
        match &mut self {
            Self::Block(job) => job.status = JobStatus::Retrying,
            Self::Log(job) => job.status = Some(JobStatus::Retrying),
        }
        self
    }
}

pub fn block_job_id(block_number: u64) -> String {
    format!("block:{block_number}")
}

pub fn log_job_id(transaction_hash: &str, log_index: u64) -> String {
    format!("log:{transaction_hash}:{log_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_job_round_trips_through_tagged_json() {
        let job = Job::Block(BlockJob {
            block_number: 123,
            block_hash: "0xabc".to_owned(),
            status: JobStatus::New,
        });
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["job_type"], "process_block");
        assert_eq!(json["status"], "new");

        let parsed: Job = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_log_job_parses_the_wire_shape() {
        let raw = serde_json::json!({
            "job_type": "process_log",
            "address": "0xtoken",
            "block_number": 100,
            "block_hash": "0xblock",
            "block_timestamp": 1_700_000_000u64,
            "data": "0x0a",
            "log_index": 5,
            "topics": ["0xsig"],
            "transaction_hash": "0xtx",
            "transaction_index": 1
        });
        let parsed: Job = serde_json::from_value(raw).unwrap();
        let Job::Log(log) = &parsed else {
            panic!("expected a log job");
        };
        assert_eq!(log.log_index, 5);
        assert_eq!(parsed.job_id(), "log:0xtx:5");
        assert!(!parsed.is_retry());
    }

    #[test]
    fn test_retry_stamp_survives_serialization() {
        let job = Job::Block(BlockJob {
            block_number: 7,
            block_hash: String::new(),
            status: JobStatus::New,
        })
        .into_retrying();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "retrying");
        assert!(job.is_retry());
    }

    #[test]
    fn test_job_ids_follow_the_queue_convention() {
        assert_eq!(block_job_id(42), "block:42");
        assert_eq!(log_job_id("0xdeadbeef", 3), "log:0xdeadbeef:3");
    }
}

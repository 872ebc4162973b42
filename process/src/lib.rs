//! The two worker families.
//!
//! Both share the same dequeue discipline: pop with a bounded timeout,
//! process the job in one store transaction, ack only after the commit
//! (or after the failure has durably landed in the dead-letter table).
//! A job whose transaction did not commit is never acked.

pub use {block::BlockProcessor, failed::FailedJobs, log::LogProcessor};

use chrono::{DateTime, Utc};

pub mod decode;

mod block;
mod failed;
mod log;
#[cfg(test)]
#[path = "tests.rs"]
mod integration_tests;

/// Block timestamps arrive as UNIX seconds; a missing or absurd value
/// degrades to "now" rather than failing the record.
pub fn job_timestamp(seconds: Option<u64>) -> DateTime<Utc> {
    seconds
        .and_then(|secs| DateTime::<Utc>::from_timestamp(i64::try_from(secs).ok()?, 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_timestamp_parses_unix_seconds() {
        let parsed = job_timestamp(Some(1_700_000_000));
        assert_eq!(parsed.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_timestamp_degrades_to_now() {
        let before = Utc::now();
        let parsed = job_timestamp(None);
        assert!(parsed >= before);
    }
}

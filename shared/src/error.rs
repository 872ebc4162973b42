use thiserror::Error;

/// Failures a worker can hit while handling a single job.
///
/// Backend-specific errors (sqlx, redis, transport) are converted to their
/// variant at the seam so the job-level failure path only ever deals with
/// one type; the original backend error is preserved in the message that
/// lands in the dead-letter row.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("rpc: {0}")]
    Rpc(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("queue: {0}")]
    Queue(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn queue(err: impl std::fmt::Display) -> Self {
        Self::Queue(err.to_string())
    }
}

/// Malformed log payloads. These never fail a job; the offending record is
/// skipped and logged (for batch events, the whole event).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid hex: {0}")]
    BadHex(String),
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    ShortData { expected: usize, actual: usize },
    #[error("abi mismatch: {0}")]
    AbiMismatch(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

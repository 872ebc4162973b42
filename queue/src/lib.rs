//! Work distribution for the indexer.
//!
//! Jobs are addressed by a string id whose payload lives in a keyed blob
//! store, while the id itself travels a named FIFO queue. The payload write
//! always precedes the queue append, so a consumer can never pop an id
//! whose data was not yet written. It can still pop an id whose data has
//! since expired, which surfaces as a popped job with no payload.

pub use {
    self::redis::{RedisQueue, RedisQueueError},
    in_memory::InMemoryQueue,
};

use {
    quarry_shared::{Job, QueueName},
    std::{error::Error as StdError, time::Duration},
};

// Safety: Unwraps allowed here because
// (1) the in-memory backend is only used in tests
// (2) all unwraps come from `Mutex` poisoning, which should never happen
// if the rest of the code does not panic.
#[allow(clippy::unwrap_used)]
mod in_memory;

mod redis;

/// A job popped off a queue. `job` is `None` when the payload expired or
/// was deleted between the push and the pop.
#[derive(Debug, Clone, PartialEq)]
pub struct PoppedJob {
    pub job_id: String,
    pub job: Option<Job>,
}

#[allow(async_fn_in_trait)]
pub trait JobQueue {
    /// The associated error type for the backing queue access operation.
    type Err: StdError + Send + Sync + 'static;

    /// Stores the payload under `job_id`, then appends `job_id` to the
    /// named queue. Re-pushing an id is permitted; the latest payload wins.
    fn push(&self, queue: QueueName, job_id: &str, job: &Job) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    /// Blocks up to `timeout` for a queue entry.
    fn pop(&self, queue: QueueName, timeout: Duration)
    -> impl ::std::future::Future<Output = Result<Option<PoppedJob>, Self::Err>> + Send;

    /// Deletes the payload. Called only after the consumer has committed
    /// its own work or durably recorded the failure.
    fn ack(&self, job_id: &str) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;
}

/// Keyed values with a time-to-live, shared by every worker against the
/// same backend. Used for the short-lived ETH/USD price.
#[allow(async_fn_in_trait)]
pub trait ValueCache {
    type Err: StdError + Send + Sync + 'static;

    fn get(&self, key: &str) -> impl ::std::future::Future<Output = Result<Option<String>, Self::Err>> + Send;

    fn put_ttl(&self, key: &str, value: &str, ttl: Duration) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;
}

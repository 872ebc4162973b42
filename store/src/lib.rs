//! The store module is responsible for the relational mirror such that it:
//!
//! * Declares the row types every component reads and writes.
//! * Defines the transactional store seam the processors work against.
//! * Ships an in-memory implementation backing the worker tests.

pub use {
    in_memory::{InMemoryStore, InMemoryTransaction},
    records::{
        AddressStatsDelta, AddressStatsRecord, ApprovalRecord, BlockRecord, ContractRecord,
        FailedJobRecord, NftStub, SwapRecord, TokenRecord, TokenType, TransactionRecord,
        TransferRecord, WorkerStatus,
    },
};

use {
    quarry_shared::JobType,
    std::error::Error as StdError,
};

// Safety: Unwraps allowed here because
// (1) the in-memory backend is only used in tests
// (2) all unwraps come from `Mutex` poisoning, which should never happen
// if the rest of the code does not panic.
#[allow(clippy::unwrap_used)]
mod in_memory;

mod records;

/// A transactional relational store.
///
/// The non-transactional operations auto-commit; everything written inside
/// a [`Store::begin`] transaction becomes visible only on commit. Primary
/// key conflicts on the `insert_*` operations are absorbed (`false` return)
/// because at-least-once delivery makes duplicates routine.
#[allow(async_fn_in_trait)]
pub trait Store {
    /// The associated error type for the backing storage access operation.
    type Err: StdError + Send + Sync + 'static;
    /// The transaction handle, borrowing the store's connection.
    type Transaction<'a>: StoreTransaction<Err = Self::Err>
    where
        Self: 'a;

    fn begin(&self) -> impl ::std::future::Future<Output = Result<Self::Transaction<'_>, Self::Err>> + Send;

    /// Updates the worker status of a block row outside any open
    /// transaction, for marking failures after a rollback.
    fn set_block_status(
        &self,
        block_number: i64,
        status: WorkerStatus,
    ) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    fn token(&self, token_address: &str) -> impl ::std::future::Future<Output = Result<Option<TokenRecord>, Self::Err>> + Send;

    fn upsert_token(&self, token: &TokenRecord) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    /// Inserts a dead-letter row, refreshing it if the job already failed
    /// before. Returns only when the row is durable.
    fn record_failed_job(&self, job: &FailedJobRecord) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    /// Deletes the dead-letter row of a successfully retried job.
    fn remove_failed_job(&self, job_id: &str) -> impl ::std::future::Future<Output = Result<bool, Self::Err>> + Send;

    /// All dead-letter rows of one job type still marked as errored.
    fn failed_jobs(&self, job_type: JobType) -> impl ::std::future::Future<Output = Result<Vec<FailedJobRecord>, Self::Err>> + Send;

    /// Marks a dead-letter row as republished: `status = retrying`,
    /// `retries + 1`, `last_retry_at = now()`.
    fn mark_retrying(&self, job_id: &str) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;
}

/// One unit of work. Savepoints nest writes so a single bad record rolls
/// back alone instead of poisoning the whole transaction.
#[allow(async_fn_in_trait)]
pub trait StoreTransaction {
    type Err: StdError + Send + Sync + 'static;

    fn savepoint(&mut self) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    fn release_savepoint(&mut self) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    fn rollback_savepoint(&mut self) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    fn commit(self) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    fn insert_block(&mut self, block: &BlockRecord) -> impl ::std::future::Future<Output = Result<bool, Self::Err>> + Send;

    fn block_by_number(&mut self, block_number: i64)
    -> impl ::std::future::Future<Output = Result<Option<BlockRecord>, Self::Err>> + Send;

    /// Rewrites a block row's hash and canonical flag, for reorg handling.
    fn set_block_hash(
        &mut self,
        block_number: i64,
        block_hash: &str,
        canonical: bool,
    ) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    fn set_block_status(
        &mut self,
        block_number: i64,
        status: WorkerStatus,
    ) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    fn insert_transaction(&mut self, tx: &TransactionRecord) -> impl ::std::future::Future<Output = Result<bool, Self::Err>> + Send;

    fn insert_contract(&mut self, contract: &ContractRecord) -> impl ::std::future::Future<Output = Result<bool, Self::Err>> + Send;

    fn is_contract(&mut self, address: &str) -> impl ::std::future::Future<Output = Result<bool, Self::Err>> + Send;

    fn insert_transfer(&mut self, transfer: &TransferRecord) -> impl ::std::future::Future<Output = Result<bool, Self::Err>> + Send;

    fn insert_approval(&mut self, approval: &ApprovalRecord) -> impl ::std::future::Future<Output = Result<bool, Self::Err>> + Send;

    fn insert_swap(&mut self, swap: &SwapRecord) -> impl ::std::future::Future<Output = Result<bool, Self::Err>> + Send;

    /// Creates the stub on first sight, otherwise just moves ownership.
    fn upsert_nft_stub(&mut self, stub: &NftStub) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;

    /// Atomic insert-or-increment of one address's counters. When a caller
    /// updates several addresses in one transaction it must issue these in
    /// lexicographic address order.
    fn apply_address_stats(&mut self, delta: &AddressStatsDelta) -> impl ::std::future::Future<Output = Result<(), Self::Err>> + Send;
}

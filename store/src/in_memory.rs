use {
    crate::{
        AddressStatsDelta, AddressStatsRecord, ApprovalRecord, BlockRecord, ContractRecord,
        FailedJobRecord, NftStub, Store, StoreTransaction, SwapRecord, TokenRecord,
        TransactionRecord, TransferRecord, WorkerStatus,
    },
    chrono::Utc,
    quarry_shared::JobType,
    std::{
        collections::BTreeMap,
        convert::Infallible,
        sync::{Arc, Mutex},
    },
};

/// Store that works with plain in-memory tables.
///
/// A transaction takes a snapshot of the tables and swaps it back in on
/// commit; savepoints stack intermediate snapshots. That makes it a
/// single-writer store, which is all the worker tests need.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    blocks: BTreeMap<i64, BlockRecord>,
    transactions: BTreeMap<String, TransactionRecord>,
    contracts: BTreeMap<String, ContractRecord>,
    transfers: BTreeMap<(String, i64), TransferRecord>,
    approvals: BTreeMap<(String, i64), ApprovalRecord>,
    swaps: BTreeMap<(String, i64), SwapRecord>,
    nft_stubs: BTreeMap<(String, String), NftStub>,
    address_stats: BTreeMap<String, AddressStatsRecord>,
    tokens: BTreeMap<String, TokenRecord>,
    failed_jobs: BTreeMap<String, FailedJobRecord>,
    /// Order in which address-stats upserts were issued, for asserting the
    /// deterministic multi-address write order.
    stats_write_log: Vec<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, block_number: i64) -> Option<BlockRecord> {
        self.inner.lock().unwrap().blocks.get(&block_number).cloned()
    }

    pub fn transaction(&self, tx_hash: &str) -> Option<TransactionRecord> {
        self.inner.lock().unwrap().transactions.get(tx_hash).cloned()
    }

    pub fn contract(&self, address: &str) -> Option<ContractRecord> {
        self.inner.lock().unwrap().contracts.get(address).cloned()
    }

    pub fn transfer(&self, tx_hash: &str, log_index: i64) -> Option<TransferRecord> {
        self.inner
            .lock()
            .unwrap()
            .transfers
            .get(&(tx_hash.to_owned(), log_index))
            .cloned()
    }

    pub fn transfer_count(&self) -> usize {
        self.inner.lock().unwrap().transfers.len()
    }

    pub fn approval(&self, tx_hash: &str, log_index: i64) -> Option<ApprovalRecord> {
        self.inner
            .lock()
            .unwrap()
            .approvals
            .get(&(tx_hash.to_owned(), log_index))
            .cloned()
    }

    pub fn swap(&self, tx_hash: &str, log_index: i64) -> Option<SwapRecord> {
        self.inner
            .lock()
            .unwrap()
            .swaps
            .get(&(tx_hash.to_owned(), log_index))
            .cloned()
    }

    pub fn nft_stub(&self, token_address: &str, token_id: &str) -> Option<NftStub> {
        self.inner
            .lock()
            .unwrap()
            .nft_stubs
            .get(&(token_address.to_owned(), token_id.to_owned()))
            .cloned()
    }

    pub fn nft_stub_count(&self) -> usize {
        self.inner.lock().unwrap().nft_stubs.len()
    }

    pub fn address_stats(&self, address: &str) -> Option<AddressStatsRecord> {
        self.inner.lock().unwrap().address_stats.get(address).cloned()
    }

    pub fn failed_job(&self, job_id: &str) -> Option<FailedJobRecord> {
        self.inner.lock().unwrap().failed_jobs.get(job_id).cloned()
    }

    /// Addresses in the order their stats upserts were issued.
    pub fn stats_write_log(&self) -> Vec<String> {
        self.inner.lock().unwrap().stats_write_log.clone()
    }
}

impl Store for InMemoryStore {
    type Err = Infallible;
    type Transaction<'a>
        = InMemoryTransaction
    where
        Self: 'a;

    async fn begin(&self) -> Result<Self::Transaction<'_>, Self::Err> {
        let working = self.inner.lock().unwrap().clone();
        Ok(InMemoryTransaction {
            inner: Arc::clone(&self.inner),
            working,
            savepoints: Vec::new(),
        })
    }

    async fn set_block_status(
        &self,
        block_number: i64,
        status: WorkerStatus,
    ) -> Result<(), Self::Err> {
        if let Some(block) = self.inner.lock().unwrap().blocks.get_mut(&block_number) {
            block.worker_status = status;
        }
        Ok(())
    }

    async fn token(&self, token_address: &str) -> Result<Option<TokenRecord>, Self::Err> {
        Ok(self.inner.lock().unwrap().tokens.get(token_address).cloned())
    }

    async fn upsert_token(&self, token: &TokenRecord) -> Result<(), Self::Err> {
        self.inner
            .lock()
            .unwrap()
            .tokens
            .insert(token.token_address.clone(), token.clone());
        Ok(())
    }

    async fn record_failed_job(&self, job: &FailedJobRecord) -> Result<(), Self::Err> {
        self.inner
            .lock()
            .unwrap()
            .failed_jobs
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn remove_failed_job(&self, job_id: &str) -> Result<bool, Self::Err> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .failed_jobs
            .remove(job_id)
            .is_some())
    }

    async fn failed_jobs(&self, job_type: JobType) -> Result<Vec<FailedJobRecord>, Self::Err> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .failed_jobs
            .values()
            .filter(|job| job.status == WorkerStatus::Error && job.job_type == job_type)
            .cloned()
            .collect())
    }

    async fn mark_retrying(&self, job_id: &str) -> Result<(), Self::Err> {
        if let Some(job) = self.inner.lock().unwrap().failed_jobs.get_mut(job_id) {
            job.status = WorkerStatus::Retrying;
            job.retries += 1;
            job.last_retry_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemoryTransaction {
    inner: Arc<Mutex<Tables>>,
    working: Tables,
    savepoints: Vec<Tables>,
}

impl StoreTransaction for InMemoryTransaction {
    type Err = Infallible;

    async fn savepoint(&mut self) -> Result<(), Self::Err> {
        self.savepoints.push(self.working.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), Self::Err> {
        self.savepoints.pop();
        Ok(())
    }

    async fn rollback_savepoint(&mut self) -> Result<(), Self::Err> {
        if let Some(snapshot) = self.savepoints.pop() {
            self.working = snapshot;
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), Self::Err> {
        *self.inner.lock().unwrap() = self.working;
        Ok(())
    }

    async fn insert_block(&mut self, block: &BlockRecord) -> Result<bool, Self::Err> {
        if self.working.blocks.contains_key(&block.block_number) {
            return Ok(false);
        }
        self.working.blocks.insert(block.block_number, block.clone());
        Ok(true)
    }

    async fn block_by_number(
        &mut self,
        block_number: i64,
    ) -> Result<Option<BlockRecord>, Self::Err> {
        Ok(self.working.blocks.get(&block_number).cloned())
    }

    async fn set_block_hash(
        &mut self,
        block_number: i64,
        block_hash: &str,
        canonical: bool,
    ) -> Result<(), Self::Err> {
        if let Some(block) = self.working.blocks.get_mut(&block_number) {
            block.block_hash = block_hash.to_owned();
            block.canonical = canonical;
        }
        Ok(())
    }

    async fn set_block_status(
        &mut self,
        block_number: i64,
        status: WorkerStatus,
    ) -> Result<(), Self::Err> {
        if let Some(block) = self.working.blocks.get_mut(&block_number) {
            block.worker_status = status;
        }
        Ok(())
    }

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<bool, Self::Err> {
        if self.working.transactions.contains_key(&tx.tx_hash) {
            return Ok(false);
        }
        self.working.transactions.insert(tx.tx_hash.clone(), tx.clone());
        Ok(true)
    }

    async fn insert_contract(&mut self, contract: &ContractRecord) -> Result<bool, Self::Err> {
        if self
            .working
            .contracts
            .contains_key(&contract.contract_address)
        {
            return Ok(false);
        }
        self.working
            .contracts
            .insert(contract.contract_address.clone(), contract.clone());
        Ok(true)
    }

    async fn is_contract(&mut self, address: &str) -> Result<bool, Self::Err> {
        Ok(self.working.contracts.contains_key(address))
    }

    async fn insert_transfer(&mut self, transfer: &TransferRecord) -> Result<bool, Self::Err> {
        let key = (transfer.tx_hash.clone(), transfer.log_index);
        if self.working.transfers.contains_key(&key) {
            return Ok(false);
        }
        self.working.transfers.insert(key, transfer.clone());
        Ok(true)
    }

    async fn insert_approval(&mut self, approval: &ApprovalRecord) -> Result<bool, Self::Err> {
        let key = (approval.tx_hash.clone(), approval.log_index);
        if self.working.approvals.contains_key(&key) {
            return Ok(false);
        }
        self.working.approvals.insert(key, approval.clone());
        Ok(true)
    }

    async fn insert_swap(&mut self, swap: &SwapRecord) -> Result<bool, Self::Err> {
        let key = (swap.tx_hash.clone(), swap.log_index);
        if self.working.swaps.contains_key(&key) {
            return Ok(false);
        }
        self.working.swaps.insert(key, swap.clone());
        Ok(true)
    }

    async fn upsert_nft_stub(&mut self, stub: &NftStub) -> Result<(), Self::Err> {
        let key = (stub.token_address.clone(), stub.token_id.to_string());
        self.working
            .nft_stubs
            .entry(key)
            .and_modify(|existing| existing.owner = stub.owner.clone())
            .or_insert_with(|| stub.clone());
        Ok(())
    }

    async fn apply_address_stats(&mut self, delta: &AddressStatsDelta) -> Result<(), Self::Err> {
        self.working.stats_write_log.push(delta.address.clone());
        self.working
            .address_stats
            .entry(delta.address.clone())
            .and_modify(|record| record.apply(delta))
            .or_insert_with(|| AddressStatsRecord::from_delta(delta));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, bigdecimal::BigDecimal};

    fn block(number: i64) -> BlockRecord {
        BlockRecord {
            block_number: number,
            block_hash: format!("0x{number:064x}"),
            canonical: true,
            worker_id: None,
            worker_status: WorkerStatus::Processing,
            extra: None,
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_block(&block(1)).await.unwrap();
        assert_eq!(store.block(1), None);
        tx.commit().await.unwrap();
        assert!(store.block(1).is_some());
    }

    #[tokio::test]
    async fn test_savepoint_rollback_discards_only_the_inner_writes() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_block(&block(1)).await.unwrap();

        tx.savepoint().await.unwrap();
        tx.insert_block(&block(2)).await.unwrap();
        tx.rollback_savepoint().await.unwrap();

        tx.savepoint().await.unwrap();
        tx.insert_block(&block(3)).await.unwrap();
        tx.release_savepoint().await.unwrap();

        tx.commit().await.unwrap();
        assert!(store.block(1).is_some());
        assert_eq!(store.block(2), None);
        assert!(store.block(3).is_some());
    }

    #[tokio::test]
    async fn test_duplicate_inserts_report_conflict() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_block(&block(1)).await.unwrap());
        assert!(!tx.insert_block(&block(1)).await.unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_address_stats_compose_across_transactions() {
        let store = InMemoryStore::new();
        let mut delta = AddressStatsDelta::new("0xaa", 10);
        delta.tx_count = 1;
        delta.eth_sent = BigDecimal::from(5);

        let mut tx = store.begin().await.unwrap();
        tx.apply_address_stats(&delta).await.unwrap();
        tx.commit().await.unwrap();

        let mut second = AddressStatsDelta::new("0xaa", 12);
        second.tx_count = 1;
        second.eth_received = BigDecimal::from(3);
        let mut tx = store.begin().await.unwrap();
        tx.apply_address_stats(&second).await.unwrap();
        tx.commit().await.unwrap();

        let stats = store.address_stats("0xaa").unwrap();
        assert_eq!(stats.tx_count, 2);
        assert_eq!(stats.eth_sent, BigDecimal::from(5));
        assert_eq!(stats.eth_received, BigDecimal::from(3));
        assert_eq!(stats.first_seen_block, 10);
        assert_eq!(stats.last_seen_block, 12);
    }

    #[tokio::test]
    async fn test_nft_stub_upsert_moves_ownership() {
        let store = InMemoryStore::new();
        let stub = NftStub {
            token_address: "0xnft".to_owned(),
            token_id: BigDecimal::from(7),
            owner: "0xaa".to_owned(),
            first_seen_block: 1,
            first_seen_tx: "0xtx1".to_owned(),
        };
        let mut tx = store.begin().await.unwrap();
        tx.upsert_nft_stub(&stub).await.unwrap();
        tx.upsert_nft_stub(&NftStub {
            owner: "0xbb".to_owned(),
            first_seen_block: 9,
            first_seen_tx: "0xtx2".to_owned(),
            ..stub.clone()
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let stored = store.nft_stub("0xnft", "7").unwrap();
        assert_eq!(stored.owner, "0xbb");
        // First-seen provenance is immutable.
        assert_eq!(stored.first_seen_block, 1);
        assert_eq!(stored.first_seen_tx, "0xtx1");
    }

    #[tokio::test]
    async fn test_failed_job_lifecycle() {
        let store = InMemoryStore::new();
        let job = FailedJobRecord {
            job_id: "block:5".to_owned(),
            queue_name: "blocks".to_owned(),
            job_type: JobType::Block,
            data: serde_json::json!({"block_number": 5}),
            error: "boom".to_owned(),
            retries: 0,
            last_retry_at: None,
            status: WorkerStatus::Error,
            worker_id: None,
        };
        store.record_failed_job(&job).await.unwrap();
        assert_eq!(store.failed_jobs(JobType::Block).await.unwrap().len(), 1);
        assert!(store.failed_jobs(JobType::Log).await.unwrap().is_empty());

        store.mark_retrying("block:5").await.unwrap();
        let marked = store.failed_job("block:5").unwrap();
        assert_eq!(marked.status, WorkerStatus::Retrying);
        assert_eq!(marked.retries, 1);
        assert!(marked.last_retry_at.is_some());
        // Retrying rows are no longer eligible for redrive.
        assert!(store.failed_jobs(JobType::Block).await.unwrap().is_empty());

        assert!(store.remove_failed_job("block:5").await.unwrap());
        assert!(!store.remove_failed_job("block:5").await.unwrap());
    }
}

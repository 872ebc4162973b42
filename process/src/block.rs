use {
    crate::{failed::FailedJobs, job_timestamp},
    bigdecimal::BigDecimal,
    chrono::{DateTime, Utc},
    quarry_chain::{ChainBlock, ChainTransaction, EthRpc},
    quarry_queue::{JobQueue, PoppedJob},
    quarry_shared::{
        BlockJob, Error, Job, JobStatus, JobType, QueueName,
        gas::effective_gas_price,
        primitives::{keccak256, lower_hex_hash, u256_to_decimal, wei_to_eth},
    },
    quarry_store::{
        AddressStatsDelta, BlockRecord, ContractRecord, Store, StoreTransaction,
        TransactionRecord, WorkerStatus,
    },
    quarry_tokens::UsdPrice,
    std::{collections::BTreeMap, time::Duration},
    tokio_util::sync::CancellationToken,
};

const FETCH_MAX_RETRIES: u32 = 5;

/// Consumes the `blocks` queue: fetches the full block, writes the block
/// row, its transactions, contract deployments and address stats in one
/// transaction, with a savepoint per transaction so one bad record cannot
/// poison the block.
pub struct BlockProcessor<Q, S, R, P> {
    queue: Q,
    store: S,
    rpc: R,
    price: P,
    failed: FailedJobs<Q, S>,
    worker_id: String,
    pop_timeout: Duration,
}

impl<Q, S, R, P> BlockProcessor<Q, S, R, P>
where
    Q: JobQueue + Clone,
    S: Store + Clone,
    R: EthRpc,
    P: UsdPrice,
{
    pub fn new(
        queue: Q,
        store: S,
        rpc: R,
        price: P,
        worker_id: impl Into<String>,
        pop_timeout: Duration,
    ) -> Self {
        let failed = FailedJobs::new(queue.clone(), store.clone(), JobType::Block);
        Self {
            queue,
            store,
            rpc,
            price,
            failed,
            worker_id: worker_id.into(),
            pop_timeout,
        }
    }

    /// The dequeue loop. Cancellation is honored between jobs only; an
    /// in-flight job always runs to completion or failure.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            worker_id = %self.worker_id,
            "Block worker listening on queue '{}'",
            QueueName::Blocks
        );
        loop {
            let popped = tokio::select! {
                _ = shutdown.cancelled() => break,
                popped = self.queue.pop(QueueName::Blocks, self.pop_timeout) => popped,
            };
            match popped {
                Ok(Some(popped)) => self.handle(popped).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Queue pop failed: {e}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
        tracing::info!(worker_id = %self.worker_id, "Block worker stopped");
    }

    pub async fn handle(&self, popped: PoppedJob) {
        let PoppedJob { job_id, job } = popped;
        let Some(job) = job else {
            tracing::warn!("Job {job_id} data missing or expired");
            return;
        };
        let Job::Block(block_job) = &job else {
            tracing::warn!("Job {job_id} is not a block job; dropping");
            if let Err(e) = self.queue.ack(&job_id).await {
                tracing::error!("Could not drop payload of {job_id}: {e}");
            }
            return;
        };
        let is_retry = job.is_retry();
        if is_retry {
            tracing::info!("Processing block {} (retry)", block_job.block_number);
        } else {
            tracing::info!("Processing block {}", block_job.block_number);
        }

        match self.process_block(block_job).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack(&job_id).await {
                    tracing::error!("Could not ack {job_id}: {e}");
                }
                if is_retry {
                    match self.failed.remove(&job_id).await {
                        Ok(true) => tracing::info!("Removed {job_id} from failed_jobs table"),
                        Ok(false) => tracing::warn!("Could not remove {job_id} from failed_jobs table"),
                        Err(e) => tracing::warn!("Failed jobs cleanup for {job_id} failed: {e}"),
                    }
                }
            }
            Err(e) => {
                tracing::error!("Error processing block {}: {e}", block_job.block_number);
                if let Err(mark_err) = self
                    .store
                    .set_block_status(block_job.block_number as i64, WorkerStatus::Error)
                    .await
                {
                    tracing::warn!(
                        "Could not mark block {} as errored: {mark_err}",
                        block_job.block_number
                    );
                }
                if self
                    .failed
                    .record(&job_id, &job, &e.to_string(), Some(&self.worker_id))
                    .await
                {
                    if let Err(ack_err) = self.queue.ack(&job_id).await {
                        tracing::error!("Could not ack dead-lettered {job_id}: {ack_err}");
                    }
                } else {
                    tracing::error!(
                        "CRITICAL: Could not record failure for {job_id} - job left in queue"
                    );
                }
            }
        }
    }

    async fn process_block(&self, job: &BlockJob) -> Result<(), Error> {
        let block_number = job.block_number as i64;
        let mut tx = self.store.begin().await.map_err(Error::storage)?;

        // A retry resumes the existing row; anything else creates it. The
        // conflict-absorbing insert also covers duplicate head events.
        let existing = if job.status == JobStatus::Retrying {
            tx.block_by_number(block_number).await.map_err(Error::storage)?
        } else {
            None
        };
        if existing.is_none() {
            tx.insert_block(&BlockRecord {
                block_number,
                block_hash: job.block_hash.clone(),
                canonical: false,
                worker_id: Some(self.worker_id.clone()),
                worker_status: WorkerStatus::Processing,
                extra: None,
            })
            .await
            .map_err(Error::storage)?;
        }

        let block = self.fetch_block_with_retry(job.block_number).await?;

        // We trust getBlock(number) at read time, so the fetched hash is
        // canonical by definition; a mismatch against the queued hash
        // means the chain reorged under us. Old child rows are not
        // rewound.
        if !job.block_hash.is_empty() && block.hash != job.block_hash {
            tracing::warn!(
                "Block {} reorg detected. Queue hash: {}, canonical hash: {}",
                job.block_number,
                job.block_hash,
                block.hash
            );
        }
        tx.set_block_hash(block_number, &block.hash, true)
            .await
            .map_err(Error::storage)?;

        let block_timestamp = job_timestamp(Some(block.timestamp));
        let eth_price = self.price.eth_usd().await;
        tracing::info!(
            "Processing {} txs from block {}",
            block.transactions.len(),
            job.block_number
        );

        for chain_tx in &block.transactions {
            tx.savepoint().await.map_err(Error::storage)?;
            match self
                .process_transaction(&mut tx, chain_tx, &block, block_timestamp, eth_price)
                .await
            {
                Ok(()) => tx.release_savepoint().await.map_err(Error::storage)?,
                Err(e) => {
                    tx.rollback_savepoint().await.map_err(Error::storage)?;
                    tracing::warn!("Error parsing tx {}: {e}", chain_tx.hash);
                }
            }
        }

        tx.set_block_status(block_number, WorkerStatus::Done)
            .await
            .map_err(Error::storage)?;
        tx.commit().await.map_err(Error::storage)?;
        tracing::info!(
            "Block {} completed ({} txs)",
            job.block_number,
            block.transactions.len()
        );
        Ok(())
    }

    /// Fetches the full block, backing off on rate limits: up to five
    /// attempts, waiting `2^n + 0.5n` seconds between them. Any other
    /// error fails immediately.
    async fn fetch_block_with_retry(&self, number: u64) -> Result<ChainBlock, Error> {
        for attempt in 0..FETCH_MAX_RETRIES {
            match self.rpc.block_by_number(number, true).await {
                Ok(Some(block)) => return Ok(block),
                Ok(None) => return Err(Error::Rpc(format!("block {number} not found"))),
                Err(e) if R::is_rate_limited(&e) && attempt + 1 < FETCH_MAX_RETRIES => {
                    let wait =
                        Duration::from_millis((1000u64 << attempt) + u64::from(attempt) * 500);
                    tracing::warn!(
                        "Rate limited (429) on block {number}, retrying in {:.1}s (attempt {}/{})",
                        wait.as_secs_f64(),
                        attempt + 1,
                        FETCH_MAX_RETRIES
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(Error::rpc(e)),
            }
        }
        Err(Error::Rpc(format!(
            "rate limited fetching block {number} after {FETCH_MAX_RETRIES} attempts"
        )))
    }

    async fn process_transaction(
        &self,
        tx: &mut S::Transaction<'_>,
        chain_tx: &ChainTransaction,
        block: &ChainBlock,
        block_timestamp: DateTime<Utc>,
        eth_price: Option<f64>,
    ) -> Result<(), Error> {
        let mut deltas: BTreeMap<String, AddressStatsDelta> = BTreeMap::new();
        let block_number = block.number as i64;

        if chain_tx.to.is_none() {
            self.check_contract_creation(tx, chain_tx, block_number, block_timestamp, &mut deltas)
                .await?;
        }

        let record = TransactionRecord {
            tx_hash: chain_tx.hash.clone(),
            block_number,
            block_hash: block.hash.clone(),
            block_timestamp,
            from_address: chain_tx.from.clone(),
            to_address: chain_tx.to.clone(),
            value: u256_to_decimal(&chain_tx.value),
            value_usd: eth_price.map(|price| wei_to_eth(&chain_tx.value) * price),
            gas_used: chain_tx.gas_limit as i64,
            gas_price: BigDecimal::from(chain_tx.gas_price.unwrap_or_default()),
            effective_gas_price: effective_gas_price(
                chain_tx.txn_type,
                chain_tx.gas_price,
                chain_tx.max_fee_per_gas,
                chain_tx.max_priority_fee_per_gas,
                block.base_fee_per_gas,
            )
            .map(BigDecimal::from),
            max_fee_per_gas: chain_tx.max_fee_per_gas.map(BigDecimal::from),
            max_priority_fee_per_gas: chain_tx.max_priority_fee_per_gas.map(BigDecimal::from),
            txn_type: Some(i16::from(chain_tx.txn_type)),
            input: chain_tx.input.clone(),
            status: 1,
        };
        if !tx.insert_transaction(&record).await.map_err(Error::storage)? {
            // Duplicate delivery; stats were counted by the first writer.
            return Ok(());
        }

        {
            let delta = deltas
                .entry(chain_tx.from.clone())
                .or_insert_with(|| AddressStatsDelta::new(chain_tx.from.clone(), block_number));
            delta.tx_count += 1;
            delta.eth_sent += u256_to_decimal(&chain_tx.value);
        }
        if let Some(to) = &chain_tx.to {
            let is_contract = tx.is_contract(to).await.map_err(Error::storage)?;
            let delta = deltas
                .entry(to.clone())
                .or_insert_with(|| AddressStatsDelta::new(to.clone(), block_number));
            delta.tx_count += 1;
            delta.eth_received += u256_to_decimal(&chain_tx.value);
            delta.is_contract |= is_contract;
        }

        // BTreeMap iteration is keyed order, which is exactly the
        // lexicographic address order the upsert discipline requires.
        for delta in deltas.values() {
            tx.apply_address_stats(delta).await.map_err(Error::storage)?;
        }
        Ok(())
    }

    /// A transaction without a `to` deployed a contract if its receipt
    /// exposes one. Chain lookups failing here skip the contract record
    /// without failing the transaction; storage failures propagate into
    /// the savepoint rollback.
    async fn check_contract_creation(
        &self,
        tx: &mut S::Transaction<'_>,
        chain_tx: &ChainTransaction,
        block_number: i64,
        block_timestamp: DateTime<Utc>,
        deltas: &mut BTreeMap<String, AddressStatsDelta>,
    ) -> Result<(), Error> {
        let receipt = match self.rpc.transaction_receipt(&chain_tx.hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!("Error processing contract creation {}: {e}", chain_tx.hash);
                return Ok(());
            }
        };
        let Some(contract_address) = receipt.contract_address else {
            return Ok(());
        };

        let bytecode_hash = match self.rpc.code_at(&contract_address).await {
            Ok(code) if code.is_empty() => None,
            Ok(code) => Some(lower_hex_hash(&keccak256(&code))),
            Err(e) => {
                tracing::warn!("Could not fetch bytecode of {contract_address}: {e}");
                None
            }
        };

        let inserted = tx
            .insert_contract(&ContractRecord {
                contract_address: contract_address.clone(),
                deployer_address: chain_tx.from.clone(),
                deployment_tx_hash: chain_tx.hash.clone(),
                deployment_block_number: block_number,
                deployment_timestamp: block_timestamp,
                bytecode_hash,
                is_verified: false,
                name: None,
            })
            .await
            .map_err(Error::storage)?;
        if inserted {
            tracing::info!("Contract deployed: {contract_address}");
            deltas
                .entry(chain_tx.from.clone())
                .or_insert_with(|| AddressStatsDelta::new(chain_tx.from.clone(), block_number))
                .contract_deployments += 1;
        }
        Ok(())
    }
}

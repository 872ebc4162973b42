use {
    crate::{decode, failed::FailedJobs, job_timestamp},
    bigdecimal::BigDecimal,
    quarry_chain::EthRpc,
    quarry_queue::{JobQueue, PoppedJob},
    quarry_shared::{
        Error, Job, JobType, LogJob, QueueName,
        primitives::{U256, ZERO_ADDRESS, address_from_topic, normalize_hex, scaled_amount,
                     u256_from_hex, u256_to_decimal},
    },
    quarry_store::{
        AddressStatsDelta, ApprovalRecord, NftStub, Store, StoreTransaction, SwapRecord,
        TokenType, TransferRecord,
    },
    quarry_tokens::{
        PoolDirectory, TokenDirectory, UNISWAP_V2_SWAP_SIGNATURE, UNISWAP_V3_SWAP_SIGNATURE,
        dex_name_for_factory,
    },
    std::{collections::BTreeMap, time::Duration},
    tokio_util::sync::CancellationToken,
};

/// keccak256("Transfer(address,address,uint256)"), shared by ERC-20 and
/// ERC-721 (the latter with an indexed token id as a fourth topic).
pub const TRANSFER_EVENT_SIGNATURE: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// keccak256("Approval(address,address,uint256)")
pub const APPROVAL_EVENT_SIGNATURE: &str =
    "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

/// keccak256("TransferSingle(address,address,address,uint256,uint256)")
pub const ERC1155_TRANSFER_SINGLE_SIGNATURE: &str =
    "0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62";

/// keccak256("TransferBatch(address,address,address,uint256[],uint256[])")
pub const ERC1155_TRANSFER_BATCH_SIGNATURE: &str =
    "0x4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb";

/// Offset multiplier that keeps synthetic batch log indexes unique within
/// a transaction.
const BATCH_LOG_INDEX_STRIDE: i64 = 1000;

/// Consumes the `logs` queue: dispatches each event by `topics[0]` and
/// writes transfers, approvals, swaps, NFT stubs and address stats.
pub struct LogProcessor<Q, S, R> {
    queue: Q,
    store: S,
    tokens: TokenDirectory<S, R>,
    pools: PoolDirectory<R>,
    failed: FailedJobs<Q, S>,
    worker_id: String,
    pop_timeout: Duration,
}

impl<Q, S, R> LogProcessor<Q, S, R>
where
    Q: JobQueue + Clone,
    S: Store + Clone,
    R: EthRpc + Clone,
{
    pub fn new(
        queue: Q,
        store: S,
        rpc: R,
        worker_id: impl Into<String>,
        pop_timeout: Duration,
    ) -> Self {
        let failed = FailedJobs::new(queue.clone(), store.clone(), JobType::Log);
        Self {
            tokens: TokenDirectory::new(store.clone(), rpc.clone()),
            pools: PoolDirectory::new(rpc),
            queue,
            store,
            failed,
            worker_id: worker_id.into(),
            pop_timeout,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            worker_id = %self.worker_id,
            "Log worker listening on queue '{}'",
            QueueName::Logs
        );
        loop {
            let popped = tokio::select! {
                _ = shutdown.cancelled() => break,
                popped = self.queue.pop(QueueName::Logs, self.pop_timeout) => popped,
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
        tracing::info!(worker_id = %self.worker_id, "Log worker stopped");
    }

    pub async fn handle(&self, popped: PoppedJob) {
        let PoppedJob { job_id, job } = popped;
        let Some(job) = job else {
            tracing::warn!("Job {job_id} data missing or expired");
            return;
        };
        let Job::Log(log_job) = &job else {
            tracing::warn!("Job {job_id} is not a log job; dropping");
            if let Err(e) = self.queue.ack(&job_id).await {
                tracing::error!("Could not drop payload of {job_id}: {e}");
            }
            return;
        };
        let is_retry = job.is_retry();

        match self.process_log(log_job).await {
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
                tracing::error!("Error processing log job {job_id}: {e}");
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

    /// Dispatches one event by its signature topic. Unknown signatures
    /// are ignored.
    pub async fn process_log(&self, job: &LogJob) -> Result<(), Error> {
        let Some(topic0) = job.topics.first() else {
            return Ok(());
        };
        match normalize_hex(topic0).as_str() {
            TRANSFER_EVENT_SIGNATURE => self.handle_token_transfer(job).await,
            APPROVAL_EVENT_SIGNATURE => self.handle_approval(job).await,
            ERC1155_TRANSFER_SINGLE_SIGNATURE => self.handle_erc1155_single(job).await,
            ERC1155_TRANSFER_BATCH_SIGNATURE => self.handle_erc1155_batch(job).await,
            UNISWAP_V2_SWAP_SIGNATURE => self.handle_v2_swap(job).await,
            UNISWAP_V3_SWAP_SIGNATURE => self.handle_v3_swap(job).await,
            _ => Ok(()),
        }
    }

    /// ERC-20 transfer, or ERC-721 when the token id rides as the fourth
    /// indexed topic.
    async fn handle_token_transfer(&self, job: &LogJob) -> Result<(), Error> {
        if job.topics.len() < 3 {
            return Ok(());
        }
        let token_address = job.address.to_ascii_lowercase();
        let from_address = address_from_topic(&job.topics[1]);
        let to_address = address_from_topic(&job.topics[2]);

        let (token_type, token_id, amount) = if job.topics.len() >= 4 {
            let token_id = match u256_from_hex(&job.topics[3]) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping transfer with bad token id in {}: {e}", job.transaction_hash);
                    return Ok(());
                }
            };
            // NFTs are 1-of-1.
            (TokenType::Erc721, Some(token_id), U256::from(1u64))
        } else {
            let amount = match u256_from_hex(&job.data) {
                Ok(amount) => amount,
                Err(e) => {
                    tracing::warn!("Skipping transfer with bad amount in {}: {e}", job.transaction_hash);
                    return Ok(());
                }
            };
            (TokenType::Erc20, None, amount)
        };

        let resolved = self
            .tokens
            .metadata(&token_address, token_type)
            .await
            .map_err(Error::storage)?;
        let normalized_amount = match token_type {
            TokenType::Erc721 => Some(BigDecimal::from(1)),
            _ => resolved
                .decimals
                .filter(|decimals| *decimals > 0)
                .map(|decimals| scaled_amount(&amount, i64::from(decimals))),
        };

        let transfer = TransferRecord {
            tx_hash: normalize_hex(&job.transaction_hash),
            log_index: job.log_index as i64,
            transaction_index: job.transaction_index.map(|index| index as i64),
            block_number: job.block_number as i64,
            block_hash: normalize_hex(&job.block_hash),
            block_timestamp: job_timestamp(job.block_timestamp),
            token_address: token_address.clone(),
            token_type,
            token_symbol: resolved.symbol,
            token_decimals: resolved.decimals,
            token_id: token_id.as_ref().map(u256_to_decimal),
            from_address,
            to_address: to_address.clone(),
            amount: u256_to_decimal(&amount),
            normalized_amount,
            amount_usd: None,
            raw_log: serde_json::to_value(job).ok(),
        };

        let stub = match (token_type, token_id, to_address) {
            (TokenType::Erc721, Some(token_id), Some(owner)) => Some(NftStub {
                token_address,
                token_id: u256_to_decimal(&token_id),
                owner,
                first_seen_block: job.block_number as i64,
                first_seen_tx: transfer.tx_hash.clone(),
            }),
            _ => None,
        };

        self.save_transfers(vec![(transfer, stub)]).await
    }

    async fn handle_approval(&self, job: &LogJob) -> Result<(), Error> {
        if job.topics.len() < 3 {
            return Ok(());
        }
        let (Some(owner), Some(spender)) = (
            address_from_topic(&job.topics[1]),
            address_from_topic(&job.topics[2]),
        ) else {
            return Ok(());
        };
        let value = match u256_from_hex(&job.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Skipping approval with bad value in {}: {e}", job.transaction_hash);
                return Ok(());
            }
        };

        let approval = ApprovalRecord {
            tx_hash: normalize_hex(&job.transaction_hash),
            log_index: job.log_index as i64,
            block_number: job.block_number as i64,
            block_timestamp: job_timestamp(job.block_timestamp),
            token_address: job.address.to_ascii_lowercase(),
            owner,
            spender,
            value: u256_to_decimal(&value),
        };

        let mut tx = self.store.begin().await.map_err(Error::storage)?;
        if tx.insert_approval(&approval).await.map_err(Error::storage)? {
            tx.commit().await.map_err(Error::storage)?;
        }
        Ok(())
    }

    async fn handle_erc1155_single(&self, job: &LogJob) -> Result<(), Error> {
        if job.topics.len() < 4 {
            return Ok(());
        }
        let token_address = job.address.to_ascii_lowercase();
        let from_address = address_from_topic(&job.topics[2]);
        let to_address = address_from_topic(&job.topics[3]);

        let (token_id, amount) = match decode::erc1155_single(&job.data) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!("Skipping TransferSingle in {}: {e}", job.transaction_hash);
                return Ok(());
            }
        };

        let resolved = self
            .tokens
            .metadata(&token_address, TokenType::Erc1155)
            .await
            .map_err(Error::storage)?;

        let transfer = TransferRecord {
            tx_hash: normalize_hex(&job.transaction_hash),
            log_index: job.log_index as i64,
            transaction_index: job.transaction_index.map(|index| index as i64),
            block_number: job.block_number as i64,
            block_hash: normalize_hex(&job.block_hash),
            block_timestamp: job_timestamp(job.block_timestamp),
            token_address: token_address.clone(),
            token_type: TokenType::Erc1155,
            token_symbol: resolved.symbol,
            token_decimals: None,
            token_id: Some(u256_to_decimal(&token_id)),
            from_address,
            to_address: to_address.clone(),
            amount: u256_to_decimal(&amount),
            normalized_amount: Some(u256_to_decimal(&amount)),
            amount_usd: None,
            raw_log: serde_json::to_value(job).ok(),
        };
        let stub = to_address.map(|owner| NftStub {
            token_address,
            token_id: u256_to_decimal(&token_id),
            owner,
            first_seen_block: job.block_number as i64,
            first_seen_tx: transfer.tx_hash.clone(),
        });

        self.save_transfers(vec![(transfer, stub)]).await
    }

    /// A batch event fans out into one transfer per `(id, value)` pair
    /// with a synthetic log index. Mismatched arrays skip the whole
    /// event.
    async fn handle_erc1155_batch(&self, job: &LogJob) -> Result<(), Error> {
        if job.topics.len() < 4 {
            return Ok(());
        }
        let token_address = job.address.to_ascii_lowercase();
        let from_address = address_from_topic(&job.topics[2]);
        let to_address = address_from_topic(&job.topics[3]);

        let (ids, values) = match decode::erc1155_batch(&job.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("Skipping TransferBatch in {}: {e}", job.transaction_hash);
                return Ok(());
            }
        };
        if ids.len() != values.len() {
            tracing::warn!(
                "ERC1155 batch in {} has mismatched arrays (ids: {}, values: {})",
                job.transaction_hash,
                ids.len(),
                values.len()
            );
            return Ok(());
        }

        let resolved = self
            .tokens
            .metadata(&token_address, TokenType::Erc1155)
            .await
            .map_err(Error::storage)?;
        let tx_hash = normalize_hex(&job.transaction_hash);

        let mut writes = Vec::with_capacity(ids.len());
        for (i, (token_id, amount)) in ids.iter().zip(&values).enumerate() {
            let transfer = TransferRecord {
                tx_hash: tx_hash.clone(),
                log_index: job.log_index as i64 * BATCH_LOG_INDEX_STRIDE + i as i64,
                transaction_index: job.transaction_index.map(|index| index as i64),
                block_number: job.block_number as i64,
                block_hash: normalize_hex(&job.block_hash),
                block_timestamp: job_timestamp(job.block_timestamp),
                token_address: token_address.clone(),
                token_type: TokenType::Erc1155,
                token_symbol: resolved.symbol.clone(),
                token_decimals: None,
                token_id: Some(u256_to_decimal(token_id)),
                from_address: from_address.clone(),
                to_address: to_address.clone(),
                amount: u256_to_decimal(amount),
                normalized_amount: Some(u256_to_decimal(amount)),
                amount_usd: None,
                raw_log: serde_json::to_value(job).ok(),
            };
            let stub = to_address.clone().map(|owner| NftStub {
                token_address: token_address.clone(),
                token_id: u256_to_decimal(token_id),
                owner,
                first_seen_block: job.block_number as i64,
                first_seen_tx: tx_hash.clone(),
            });
            writes.push((transfer, stub));
        }

        self.save_transfers(writes).await
    }

    /// Writes transfers plus their bookkeeping in one transaction:
    /// address counters for every non-zero side (flushed in lexicographic
    /// order) and NFT ownership stubs. Duplicates contribute nothing.
    async fn save_transfers(
        &self,
        writes: Vec<(TransferRecord, Option<NftStub>)>,
    ) -> Result<(), Error> {
        let mut tx = self.store.begin().await.map_err(Error::storage)?;
        let mut deltas: BTreeMap<String, AddressStatsDelta> = BTreeMap::new();
        let mut inserted = 0usize;

        for (transfer, stub) in &writes {
            if !tx.insert_transfer(transfer).await.map_err(Error::storage)? {
                tracing::debug!(
                    "Duplicate transfer {}:{} (already processed)",
                    transfer.tx_hash,
                    transfer.log_index
                );
                continue;
            }
            inserted += 1;

            let block_number = transfer.block_number;
            if let Some(from) = transfer
                .from_address
                .as_deref()
                .filter(|address| *address != ZERO_ADDRESS)
            {
                deltas
                    .entry(from.to_owned())
                    .or_insert_with(|| AddressStatsDelta::new(from, block_number))
                    .token_transfers_sent += 1;
            }
            if let Some(to) = transfer
                .to_address
                .as_deref()
                .filter(|address| *address != ZERO_ADDRESS)
            {
                deltas
                    .entry(to.to_owned())
                    .or_insert_with(|| AddressStatsDelta::new(to, block_number))
                    .token_transfers_received += 1;
            }
            if let Some(stub) = stub {
                tx.upsert_nft_stub(stub).await.map_err(Error::storage)?;
            }
        }

        if inserted == 0 {
            return Ok(());
        }
        for delta in deltas.values() {
            tx.apply_address_stats(delta).await.map_err(Error::storage)?;
        }
        tx.commit().await.map_err(Error::storage)?;
        if writes.len() > 1 {
            tracing::info!("Saved {inserted} ERC1155 batch transfers");
        }
        Ok(())
    }

    async fn handle_v2_swap(&self, job: &LogJob) -> Result<(), Error> {
        if job.topics.len() < 3 {
            return Ok(());
        }
        let pool_address = job.address.to_ascii_lowercase();
        let (Some(sender), Some(recipient)) = (
            address_from_topic(&job.topics[1]),
            address_from_topic(&job.topics[2]),
        ) else {
            return Ok(());
        };
        let amounts = match decode::v2_swap(&job.data) {
            Ok(amounts) => amounts,
            Err(e) => {
                tracing::warn!("Skipping V2 swap in {}: {e}", job.transaction_hash);
                return Ok(());
            }
        };

        let Some((token0, token1)) = self.pools.token_pair(&pool_address).await else {
            tracing::warn!("Could not fetch pool tokens for {pool_address}");
            return Ok(());
        };
        let factory = self.pools.factory(&pool_address).await;
        // Pools that hide their factory still look like V2 by shape.
        let dex_name = dex_name_for_factory(factory.as_deref()).unwrap_or("uniswap_v2");

        let swap = SwapRecord {
            tx_hash: normalize_hex(&job.transaction_hash),
            log_index: job.log_index as i64,
            transaction_index: job.transaction_index.map(|index| index as i64),
            block_number: job.block_number as i64,
            block_timestamp: job_timestamp(job.block_timestamp),
            dex_name: dex_name.to_owned(),
            pool_address,
            token0_address: token0,
            token1_address: token1,
            amount0_in: amounts.amount0_in.to_string(),
            amount1_in: amounts.amount1_in.to_string(),
            amount0_out: amounts.amount0_out.to_string(),
            amount1_out: amounts.amount1_out.to_string(),
            sender,
            recipient,
            sqrt_price_x96: None,
            liquidity: None,
            tick: None,
        };
        self.save_swap(swap).await
    }

    async fn handle_v3_swap(&self, job: &LogJob) -> Result<(), Error> {
        if job.topics.len() < 3 {
            return Ok(());
        }
        let pool_address = job.address.to_ascii_lowercase();
        let (Some(sender), Some(recipient)) = (
            address_from_topic(&job.topics[1]),
            address_from_topic(&job.topics[2]),
        ) else {
            return Ok(());
        };
        let swap_data = match decode::v3_swap(&job.data) {
            Ok(swap_data) => swap_data,
            Err(e) => {
                tracing::warn!("Skipping V3 swap in {}: {e}", job.transaction_hash);
                return Ok(());
            }
        };

        let Some((token0, token1)) = self.pools.token_pair(&pool_address).await else {
            tracing::warn!("Could not fetch pool tokens for {pool_address}");
            return Ok(());
        };

        let (amount0_in, amount0_out) = decode::signed_flow(swap_data.amount0);
        let (amount1_in, amount1_out) = decode::signed_flow(swap_data.amount1);

        let swap = SwapRecord {
            tx_hash: normalize_hex(&job.transaction_hash),
            log_index: job.log_index as i64,
            transaction_index: job.transaction_index.map(|index| index as i64),
            block_number: job.block_number as i64,
            block_timestamp: job_timestamp(job.block_timestamp),
            dex_name: "uniswap_v3".to_owned(),
            pool_address,
            token0_address: token0,
            token1_address: token1,
            amount0_in,
            amount1_in,
            amount0_out,
            amount1_out,
            sender,
            recipient,
            sqrt_price_x96: Some(swap_data.sqrt_price_x96.to_string()),
            liquidity: Some(swap_data.liquidity.to_string()),
            tick: Some(swap_data.tick),
        };
        self.save_swap(swap).await
    }

    async fn save_swap(&self, swap: SwapRecord) -> Result<(), Error> {
        let dex_name = swap.dex_name.clone();
        let mut tx = self.store.begin().await.map_err(Error::storage)?;
        if tx.insert_swap(&swap).await.map_err(Error::storage)? {
            tx.commit().await.map_err(Error::storage)?;
            tracing::info!("Indexed {dex_name} swap");
        }
        Ok(())
    }
}

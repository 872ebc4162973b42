//! Postgres implementation of the store traits.
//!
//! Concurrency control is delegated to the database: primary-key conflicts
//! absorb duplicate deliveries (`ON CONFLICT DO NOTHING`), counters
//! compose through `col = col + EXCLUDED.col` upserts, and per-record
//! isolation inside a block uses real `SAVEPOINT`s.

use {
    quarry_shared::JobType,
    quarry_store::{
        AddressStatsDelta, ApprovalRecord, BlockRecord, ContractRecord, FailedJobRecord, NftStub,
        Store, StoreTransaction, SwapRecord, TokenRecord, TokenType, TransactionRecord,
        TransferRecord, WorkerStatus,
    },
    sqlx::{
        PgPool, Postgres, Row, Transaction,
        postgres::{PgPoolOptions, PgRow},
    },
};

mod schema;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates all tables and indexes that do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in schema::CREATE_TABLES.iter().chain(schema::CREATE_INDEXES) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn block_from_row(row: &PgRow) -> Result<BlockRecord, sqlx::Error> {
    let status: String = row.try_get("worker_status")?;
    Ok(BlockRecord {
        block_number: row.try_get("block_number")?,
        block_hash: row.try_get("block_hash")?,
        canonical: row.try_get("canonical")?,
        worker_id: row.try_get("worker_id")?,
        worker_status: WorkerStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown worker status `{status}`")))?,
        extra: row.try_get("extra")?,
    })
}

fn failed_job_from_row(row: &PgRow) -> Result<FailedJobRecord, sqlx::Error> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;
    Ok(FailedJobRecord {
        job_id: row.try_get("job_id")?,
        queue_name: row.try_get("queue_name")?,
        job_type: match job_type.as_str() {
            "process_block" => JobType::Block,
            "process_log" => JobType::Log,
            other => return Err(decode_error(format!("unknown job type `{other}`"))),
        },
        data: row.try_get("data")?,
        error: row.try_get::<Option<String>, _>("error")?.unwrap_or_default(),
        retries: row.try_get("retries")?,
        last_retry_at: row.try_get("last_retry_at")?,
        status: WorkerStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown worker status `{status}`")))?,
        worker_id: row.try_get("worker_id")?,
    })
}

impl Store for PgStore {
    type Err = sqlx::Error;
    type Transaction<'a>
        = PgStoreTransaction
    where
        Self: 'a;

    async fn begin(&self) -> Result<Self::Transaction<'_>, Self::Err> {
        Ok(PgStoreTransaction {
            tx: self.pool.begin().await?,
            depth: 0,
        })
    }

    async fn set_block_status(
        &self,
        block_number: i64,
        status: WorkerStatus,
    ) -> Result<(), Self::Err> {
        sqlx::query("UPDATE blocks SET worker_status = $2 WHERE block_number = $1")
            .bind(block_number)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn token(&self, token_address: &str) -> Result<Option<TokenRecord>, Self::Err> {
        let row = sqlx::query(
            "SELECT token_address, token_type, symbol, name, decimals, failed, extra
             FROM tokens WHERE token_address = $1",
        )
        .bind(token_address)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(TokenRecord {
                token_address: row.try_get("token_address")?,
                token_type: row
                    .try_get::<Option<String>, _>("token_type")?
                    .as_deref()
                    .and_then(TokenType::parse),
                symbol: row.try_get("symbol")?,
                name: row.try_get("name")?,
                decimals: row.try_get("decimals")?,
                failed: row.try_get("failed")?,
                extra: row.try_get("extra")?,
            })
        })
        .transpose()
    }

    async fn upsert_token(&self, token: &TokenRecord) -> Result<(), Self::Err> {
        sqlx::query(
            "INSERT INTO tokens (token_address, token_type, symbol, name, decimals, failed, extra)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (token_address) DO UPDATE SET
                 token_type = EXCLUDED.token_type,
                 symbol = EXCLUDED.symbol,
                 name = EXCLUDED.name,
                 decimals = EXCLUDED.decimals,
                 failed = EXCLUDED.failed,
                 extra = EXCLUDED.extra,
                 fetched_at = now()",
        )
        .bind(&token.token_address)
        .bind(token.token_type.map(|t| t.as_str()))
        .bind(&token.symbol)
        .bind(&token.name)
        .bind(token.decimals)
        .bind(token.failed)
        .bind(&token.extra)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failed_job(&self, job: &FailedJobRecord) -> Result<(), Self::Err> {
        sqlx::query(
            "INSERT INTO failed_jobs (job_id, queue_name, job_type, data, error, status, worker_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (job_id) DO UPDATE SET
                 data = EXCLUDED.data,
                 error = EXCLUDED.error,
                 status = EXCLUDED.status,
                 worker_id = EXCLUDED.worker_id,
                 failed_at = now()",
        )
        .bind(&job.job_id)
        .bind(&job.queue_name)
        .bind(job.job_type.as_str())
        .bind(&job.data)
        .bind(&job.error)
        .bind(job.status.as_str())
        .bind(&job.worker_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_failed_job(&self, job_id: &str) -> Result<bool, Self::Err> {
        let result = sqlx::query("DELETE FROM failed_jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn failed_jobs(&self, job_type: JobType) -> Result<Vec<FailedJobRecord>, Self::Err> {
        let rows = sqlx::query(
            "SELECT job_id, queue_name, job_type, data, error, retries, last_retry_at, status,
                    worker_id
             FROM failed_jobs WHERE status = 'error' AND job_type = $1
             ORDER BY id",
        )
        .bind(job_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(failed_job_from_row).collect()
    }

    async fn mark_retrying(&self, job_id: &str) -> Result<(), Self::Err> {
        sqlx::query(
            "UPDATE failed_jobs
             SET status = 'retrying', retries = retries + 1, last_retry_at = now()
             WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
    depth: u32,
}

impl StoreTransaction for PgStoreTransaction {
    type Err = sqlx::Error;

    async fn savepoint(&mut self) -> Result<(), Self::Err> {
        self.depth += 1;
        let name = format!("quarry_sp_{}", self.depth);
        sqlx::query(&format!("SAVEPOINT {name}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), Self::Err> {
        if self.depth == 0 {
            return Ok(());
        }
        let name = format!("quarry_sp_{}", self.depth);
        self.depth -= 1;
        sqlx::query(&format!("RELEASE SAVEPOINT {name}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn rollback_savepoint(&mut self) -> Result<(), Self::Err> {
        if self.depth == 0 {
            return Ok(());
        }
        let name = format!("quarry_sp_{}", self.depth);
        self.depth -= 1;
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), Self::Err> {
        self.tx.commit().await
    }

    async fn insert_block(&mut self, block: &BlockRecord) -> Result<bool, Self::Err> {
        let result = sqlx::query(
            "INSERT INTO blocks (block_number, block_hash, canonical, worker_id, worker_status,
                                 extra)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (block_number) DO NOTHING",
        )
        .bind(block.block_number)
        .bind(&block.block_hash)
        .bind(block.canonical)
        .bind(&block.worker_id)
        .bind(block.worker_status.as_str())
        .bind(&block.extra)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn block_by_number(
        &mut self,
        block_number: i64,
    ) -> Result<Option<BlockRecord>, Self::Err> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, canonical, worker_id, worker_status, extra
             FROM blocks WHERE block_number = $1",
        )
        .bind(block_number)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn set_block_hash(
        &mut self,
        block_number: i64,
        block_hash: &str,
        canonical: bool,
    ) -> Result<(), Self::Err> {
        sqlx::query("UPDATE blocks SET block_hash = $2, canonical = $3 WHERE block_number = $1")
            .bind(block_number)
            .bind(block_hash)
            .bind(canonical)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_block_status(
        &mut self,
        block_number: i64,
        status: WorkerStatus,
    ) -> Result<(), Self::Err> {
        sqlx::query("UPDATE blocks SET worker_status = $2 WHERE block_number = $1")
            .bind(block_number)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<bool, Self::Err> {
        let result = sqlx::query(
            "INSERT INTO transactions (tx_hash, block_number, block_hash, block_timestamp,
                 from_address, to_address, value, value_usd, gas_used, gas_price,
                 effective_gas_price, max_fee_per_gas, max_priority_fee_per_gas, txn_type, input,
                 status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             ON CONFLICT (tx_hash) DO NOTHING",
        )
        .bind(&tx.tx_hash)
        .bind(tx.block_number)
        .bind(&tx.block_hash)
        .bind(tx.block_timestamp)
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(&tx.value)
        .bind(tx.value_usd)
        .bind(tx.gas_used)
        .bind(&tx.gas_price)
        .bind(&tx.effective_gas_price)
        .bind(&tx.max_fee_per_gas)
        .bind(&tx.max_priority_fee_per_gas)
        .bind(tx.txn_type)
        .bind(&tx.input)
        .bind(tx.status)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_contract(&mut self, contract: &ContractRecord) -> Result<bool, Self::Err> {
        let result = sqlx::query(
            "INSERT INTO contracts (contract_address, deployer_address, deployment_tx_hash,
                 deployment_block_number, deployment_timestamp, bytecode_hash, is_verified, name)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (contract_address) DO NOTHING",
        )
        .bind(&contract.contract_address)
        .bind(&contract.deployer_address)
        .bind(&contract.deployment_tx_hash)
        .bind(contract.deployment_block_number)
        .bind(contract.deployment_timestamp)
        .bind(&contract.bytecode_hash)
        .bind(contract.is_verified)
        .bind(&contract.name)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_contract(&mut self, address: &str) -> Result<bool, Self::Err> {
        let row = sqlx::query("SELECT 1 AS one FROM contracts WHERE contract_address = $1")
            .bind(address)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_transfer(&mut self, transfer: &TransferRecord) -> Result<bool, Self::Err> {
        let result = sqlx::query(
            "INSERT INTO transfers (tx_hash, log_index, transaction_index, block_number,
                 block_hash, block_timestamp, token_address, token_type, token_symbol,
                 token_decimals, token_id, from_address, to_address, amount, normalized_amount,
                 amount_usd, raw_log)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
             ON CONFLICT (tx_hash, log_index) DO NOTHING",
        )
        .bind(&transfer.tx_hash)
        .bind(transfer.log_index)
        .bind(transfer.transaction_index)
        .bind(transfer.block_number)
        .bind(&transfer.block_hash)
        .bind(transfer.block_timestamp)
        .bind(&transfer.token_address)
        .bind(transfer.token_type.as_str())
        .bind(&transfer.token_symbol)
        .bind(transfer.token_decimals)
        .bind(&transfer.token_id)
        .bind(&transfer.from_address)
        .bind(&transfer.to_address)
        .bind(&transfer.amount)
        .bind(&transfer.normalized_amount)
        .bind(transfer.amount_usd)
        .bind(&transfer.raw_log)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_approval(&mut self, approval: &ApprovalRecord) -> Result<bool, Self::Err> {
        let result = sqlx::query(
            "INSERT INTO approvals (tx_hash, log_index, block_number, block_timestamp,
                 token_address, owner, spender, value)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (tx_hash, log_index) DO NOTHING",
        )
        .bind(&approval.tx_hash)
        .bind(approval.log_index)
        .bind(approval.block_number)
        .bind(approval.block_timestamp)
        .bind(&approval.token_address)
        .bind(&approval.owner)
        .bind(&approval.spender)
        .bind(&approval.value)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_swap(&mut self, swap: &SwapRecord) -> Result<bool, Self::Err> {
        let result = sqlx::query(
            "INSERT INTO swaps (tx_hash, log_index, transaction_index, block_number,
                 block_timestamp, dex_name, pool_address, token0_address, token1_address,
                 amount0_in, amount1_in, amount0_out, amount1_out, sender, recipient,
                 sqrt_price_x96, liquidity, tick)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                     $18)
             ON CONFLICT (tx_hash, log_index) DO NOTHING",
        )
        .bind(&swap.tx_hash)
        .bind(swap.log_index)
        .bind(swap.transaction_index)
        .bind(swap.block_number)
        .bind(swap.block_timestamp)
        .bind(&swap.dex_name)
        .bind(&swap.pool_address)
        .bind(&swap.token0_address)
        .bind(&swap.token1_address)
        .bind(&swap.amount0_in)
        .bind(&swap.amount1_in)
        .bind(&swap.amount0_out)
        .bind(&swap.amount1_out)
        .bind(&swap.sender)
        .bind(&swap.recipient)
        .bind(&swap.sqrt_price_x96)
        .bind(&swap.liquidity)
        .bind(swap.tick)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_nft_stub(&mut self, stub: &NftStub) -> Result<(), Self::Err> {
        sqlx::query(
            "INSERT INTO nft_metadata (token_address, token_id, owner, first_seen_block,
                 first_seen_tx, metadata_fetched)
             VALUES ($1, $2, $3, $4, $5, FALSE)
             ON CONFLICT (token_address, token_id) DO UPDATE SET
                 owner = EXCLUDED.owner,
                 updated_at = now()",
        )
        .bind(&stub.token_address)
        .bind(&stub.token_id)
        .bind(&stub.owner)
        .bind(stub.first_seen_block)
        .bind(&stub.first_seen_tx)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn apply_address_stats(&mut self, delta: &AddressStatsDelta) -> Result<(), Self::Err> {
        sqlx::query(
            "INSERT INTO address_stats (address, first_seen_block, last_seen_block, tx_count,
                 eth_sent, eth_received, contract_deployments, token_transfers_sent,
                 token_transfers_received, is_contract)
             VALUES ($1, $2, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (address) DO UPDATE SET
                 last_seen_block = EXCLUDED.last_seen_block,
                 tx_count = address_stats.tx_count + EXCLUDED.tx_count,
                 eth_sent = address_stats.eth_sent + EXCLUDED.eth_sent,
                 eth_received = address_stats.eth_received + EXCLUDED.eth_received,
                 contract_deployments
                     = address_stats.contract_deployments + EXCLUDED.contract_deployments,
                 token_transfers_sent
                     = address_stats.token_transfers_sent + EXCLUDED.token_transfers_sent,
                 token_transfers_received
                     = address_stats.token_transfers_received + EXCLUDED.token_transfers_received,
                 is_contract = address_stats.is_contract OR EXCLUDED.is_contract,
                 updated_at = now()",
        )
        .bind(&delta.address)
        .bind(delta.block_number)
        .bind(delta.tx_count)
        .bind(&delta.eth_sent)
        .bind(&delta.eth_received)
        .bind(delta.contract_deployments)
        .bind(delta.token_transfers_sent)
        .bind(delta.token_transfers_received)
        .bind(delta.is_contract)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

//! Row types of the relational mirror.
//!
//! Addresses and hashes are canonical lowercase `0x` hex strings (the
//! writers guarantee it, the store trusts it). Chain quantities that can
//! reach `uint256` are carried as [`BigDecimal`]; block numbers and
//! counters fit `i64`.

use {
    bigdecimal::BigDecimal,
    chrono::{DateTime, Utc},
    quarry_shared::JobType,
};

/// Lifecycle of a block row, also reused for dead-letter rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Processing,
    Done,
    Error,
    Retrying,
}

impl WorkerStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
            Self::Retrying => "retrying",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "retrying" => Some(Self::Retrying),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Erc20,
    Erc721,
    Erc1155,
}

impl TokenType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Erc20 => "erc20",
            Self::Erc721 => "erc721",
            Self::Erc1155 => "erc1155",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "erc20" => Some(Self::Erc20),
            "erc721" => Some(Self::Erc721),
            "erc1155" => Some(Self::Erc1155),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockRecord {
    pub block_number: i64,
    pub block_hash: String,
    pub canonical: bool,
    pub worker_id: Option<String>,
    pub worker_status: WorkerStatus,
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub tx_hash: String,
    pub block_number: i64,
    pub block_hash: String,
    pub block_timestamp: DateTime<Utc>,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value: BigDecimal,
    pub value_usd: Option<f64>,
    pub gas_used: i64,
    pub gas_price: BigDecimal,
    pub effective_gas_price: Option<BigDecimal>,
    pub max_fee_per_gas: Option<BigDecimal>,
    pub max_priority_fee_per_gas: Option<BigDecimal>,
    pub txn_type: Option<i16>,
    pub input: String,
    pub status: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractRecord {
    pub contract_address: String,
    pub deployer_address: String,
    pub deployment_tx_hash: String,
    pub deployment_block_number: i64,
    pub deployment_timestamp: DateTime<Utc>,
    pub bytecode_hash: Option<String>,
    pub is_verified: bool,
    pub name: Option<String>,
}

/// One token-transfer line item, fully denormalized. For ERC-1155 batch
/// events the `log_index` is synthetic: `base_log_index * 1000 + i`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub tx_hash: String,
    pub log_index: i64,
    pub transaction_index: Option<i64>,
    pub block_number: i64,
    pub block_hash: String,
    pub block_timestamp: DateTime<Utc>,
    pub token_address: String,
    pub token_type: TokenType,
    pub token_symbol: Option<String>,
    pub token_decimals: Option<i16>,
    pub token_id: Option<BigDecimal>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub amount: BigDecimal,
    pub normalized_amount: Option<BigDecimal>,
    pub amount_usd: Option<f64>,
    pub raw_log: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRecord {
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub token_address: String,
    pub owner: String,
    pub spender: String,
    pub value: BigDecimal,
}

/// DEX swap. The four directional amounts are stringified integers so the
/// V3 signed decoding and the V2 unsigned decoding store uniformly.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapRecord {
    pub tx_hash: String,
    pub log_index: i64,
    pub transaction_index: Option<i64>,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub dex_name: String,
    pub pool_address: String,
    pub token0_address: String,
    pub token1_address: String,
    pub amount0_in: String,
    pub amount1_in: String,
    pub amount0_out: String,
    pub amount1_out: String,
    pub sender: String,
    pub recipient: String,
    pub sqrt_price_x96: Option<String>,
    pub liquidity: Option<String>,
    pub tick: Option<i32>,
}

/// The on-chain half of an NFT metadata row. The off-chain fields
/// (token URI contents, image, attributes) belong to the external
/// metadata fetcher and start out unfetched.
#[derive(Debug, Clone, PartialEq)]
pub struct NftStub {
    pub token_address: String,
    pub token_id: BigDecimal,
    pub owner: String,
    pub first_seen_block: i64,
    pub first_seen_tx: String,
}

/// Increments to apply to one address's rolling counters, composed with
/// `column + delta` upserts so concurrent writers never lose updates.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressStatsDelta {
    pub address: String,
    pub block_number: i64,
    pub tx_count: i64,
    pub eth_sent: BigDecimal,
    pub eth_received: BigDecimal,
    pub contract_deployments: i64,
    pub token_transfers_sent: i64,
    pub token_transfers_received: i64,
    pub is_contract: bool,
}

impl AddressStatsDelta {
    pub fn new(address: impl Into<String>, block_number: i64) -> Self {
        Self {
            address: address.into(),
            block_number,
            tx_count: 0,
            eth_sent: BigDecimal::default(),
            eth_received: BigDecimal::default(),
            contract_deployments: 0,
            token_transfers_sent: 0,
            token_transfers_received: 0,
            is_contract: false,
        }
    }

    /// Folds another delta for the same address into this one.
    pub fn merge(&mut self, other: Self) {
        self.block_number = self.block_number.max(other.block_number);
        self.tx_count += other.tx_count;
        self.eth_sent += other.eth_sent;
        self.eth_received += other.eth_received;
        self.contract_deployments += other.contract_deployments;
        self.token_transfers_sent += other.token_transfers_sent;
        self.token_transfers_received += other.token_transfers_received;
        self.is_contract |= other.is_contract;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressStatsRecord {
    pub address: String,
    pub first_seen_block: i64,
    pub last_seen_block: i64,
    pub tx_count: i64,
    pub eth_sent: BigDecimal,
    pub eth_received: BigDecimal,
    pub contract_deployments: i64,
    pub token_transfers_sent: i64,
    pub token_transfers_received: i64,
    pub is_contract: bool,
}

impl AddressStatsRecord {
    pub fn from_delta(delta: &AddressStatsDelta) -> Self {
        Self {
            address: delta.address.clone(),
            first_seen_block: delta.block_number,
            last_seen_block: delta.block_number,
            tx_count: delta.tx_count,
            eth_sent: delta.eth_sent.clone(),
            eth_received: delta.eth_received.clone(),
            contract_deployments: delta.contract_deployments,
            token_transfers_sent: delta.token_transfers_sent,
            token_transfers_received: delta.token_transfers_received,
            is_contract: delta.is_contract,
        }
    }

    pub fn apply(&mut self, delta: &AddressStatsDelta) {
        self.last_seen_block = delta.block_number;
        self.tx_count += delta.tx_count;
        self.eth_sent += delta.eth_sent.clone();
        self.eth_received += delta.eth_received.clone();
        self.contract_deployments += delta.contract_deployments;
        self.token_transfers_sent += delta.token_transfers_sent;
        self.token_transfers_received += delta.token_transfers_received;
        self.is_contract |= delta.is_contract;
    }
}

/// Cached token metadata. `failed` marks tokens whose every view call
/// threw, so they are not refetched on each transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub token_address: String,
    pub token_type: Option<TokenType>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<i16>,
    pub failed: bool,
    pub extra: Option<serde_json::Value>,
}

/// A dead-letter row, retained until a redriven attempt succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedJobRecord {
    pub job_id: String,
    pub queue_name: String,
    pub job_type: JobType,
    pub data: serde_json::Value,
    pub error: String,
    pub retries: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub status: WorkerStatus,
    pub worker_id: Option<String>,
}

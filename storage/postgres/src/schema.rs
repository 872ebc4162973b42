//! Idempotent schema bootstrap.
//!
//! Every statement is `IF NOT EXISTS` so a fleet of workers can race the
//! bootstrap without coordination.

pub(crate) const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blocks (
        block_number BIGINT PRIMARY KEY,
        block_hash TEXT NOT NULL,
        canonical BOOLEAN NOT NULL DEFAULT TRUE,
        processed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        worker_id TEXT,
        worker_status TEXT NOT NULL,
        extra JSONB
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        tx_hash VARCHAR(66) PRIMARY KEY,
        block_number BIGINT NOT NULL,
        block_hash VARCHAR(66) NOT NULL,
        block_timestamp TIMESTAMPTZ NOT NULL,
        from_address VARCHAR(42) NOT NULL,
        to_address VARCHAR(42),
        value NUMERIC(38,0) NOT NULL,
        value_usd DOUBLE PRECISION,
        gas_used BIGINT NOT NULL,
        gas_price NUMERIC(38,0) NOT NULL,
        effective_gas_price NUMERIC(38,0),
        max_fee_per_gas NUMERIC(38,0),
        max_priority_fee_per_gas NUMERIC(38,0),
        txn_type SMALLINT,
        input TEXT NOT NULL,
        status SMALLINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS contracts (
        contract_address VARCHAR(42) PRIMARY KEY,
        deployer_address VARCHAR(42) NOT NULL,
        deployment_tx_hash VARCHAR(66) NOT NULL,
        deployment_block_number BIGINT NOT NULL,
        deployment_timestamp TIMESTAMPTZ NOT NULL,
        bytecode_hash TEXT,
        is_verified BOOLEAN NOT NULL DEFAULT FALSE,
        name TEXT
    )",
    "CREATE TABLE IF NOT EXISTS transfers (
        tx_hash VARCHAR(66) NOT NULL,
        log_index BIGINT NOT NULL,
        transaction_index BIGINT,
        block_number BIGINT NOT NULL,
        block_hash VARCHAR(66) NOT NULL,
        block_timestamp TIMESTAMPTZ NOT NULL,
        token_address VARCHAR(42) NOT NULL,
        token_type TEXT NOT NULL DEFAULT 'erc20',
        token_symbol TEXT,
        token_decimals SMALLINT,
        token_id NUMERIC(78,0),
        from_address VARCHAR(42),
        to_address VARCHAR(42),
        amount NUMERIC(78,0) NOT NULL,
        normalized_amount NUMERIC(38,8),
        amount_usd DOUBLE PRECISION,
        price_source TEXT,
        price_timestamp TIMESTAMPTZ,
        receipt_status SMALLINT,
        raw_log JSONB,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (tx_hash, log_index)
    )",
    "CREATE TABLE IF NOT EXISTS approvals (
        tx_hash VARCHAR(66) NOT NULL,
        log_index BIGINT NOT NULL,
        block_number BIGINT NOT NULL,
        block_timestamp TIMESTAMPTZ NOT NULL,
        token_address VARCHAR(42) NOT NULL,
        owner VARCHAR(42) NOT NULL,
        spender VARCHAR(42) NOT NULL,
        value NUMERIC(78,0) NOT NULL,
        PRIMARY KEY (tx_hash, log_index)
    )",
    "CREATE TABLE IF NOT EXISTS swaps (
        tx_hash VARCHAR(66) NOT NULL,
        log_index BIGINT NOT NULL,
        transaction_index BIGINT,
        block_number BIGINT NOT NULL,
        block_timestamp TIMESTAMPTZ NOT NULL,
        dex_name TEXT NOT NULL,
        pool_address VARCHAR(42) NOT NULL,
        token0_address VARCHAR(42) NOT NULL,
        token1_address VARCHAR(42) NOT NULL,
        amount0_in TEXT NOT NULL,
        amount1_in TEXT NOT NULL,
        amount0_out TEXT NOT NULL,
        amount1_out TEXT NOT NULL,
        sender VARCHAR(42) NOT NULL,
        recipient VARCHAR(42) NOT NULL,
        sqrt_price_x96 TEXT,
        liquidity TEXT,
        tick INTEGER,
        PRIMARY KEY (tx_hash, log_index)
    )",
    "CREATE TABLE IF NOT EXISTS nft_metadata (
        token_address VARCHAR(42) NOT NULL,
        token_id NUMERIC(78,0) NOT NULL,
        owner VARCHAR(42),
        token_uri TEXT,
        name TEXT,
        description TEXT,
        image_url TEXT,
        external_url TEXT,
        animation_url TEXT,
        attributes JSONB,
        first_seen_block BIGINT,
        first_seen_tx VARCHAR(66),
        metadata_fetched BOOLEAN NOT NULL DEFAULT FALSE,
        metadata_fetch_failed BOOLEAN NOT NULL DEFAULT FALSE,
        metadata_fetch_error TEXT,
        last_fetched_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (token_address, token_id)
    )",
    "CREATE TABLE IF NOT EXISTS address_stats (
        address VARCHAR(42) PRIMARY KEY,
        first_seen_block BIGINT NOT NULL,
        last_seen_block BIGINT NOT NULL,
        tx_count BIGINT NOT NULL DEFAULT 0,
        eth_sent NUMERIC(38,0) NOT NULL DEFAULT 0,
        eth_received NUMERIC(38,0) NOT NULL DEFAULT 0,
        contract_deployments BIGINT NOT NULL DEFAULT 0,
        token_transfers_sent BIGINT NOT NULL DEFAULT 0,
        token_transfers_received BIGINT NOT NULL DEFAULT 0,
        is_contract BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS tokens (
        token_address VARCHAR(42) PRIMARY KEY,
        token_type TEXT,
        symbol TEXT,
        name TEXT,
        decimals SMALLINT,
        fetched_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        failed BOOLEAN NOT NULL DEFAULT FALSE,
        extra JSONB
    )",
    "CREATE TABLE IF NOT EXISTS failed_jobs (
        id BIGSERIAL PRIMARY KEY,
        job_id VARCHAR(100) UNIQUE NOT NULL,
        queue_name VARCHAR(50) NOT NULL,
        job_type VARCHAR(50) NOT NULL,
        data JSONB NOT NULL,
        error TEXT,
        failed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        retries INTEGER NOT NULL DEFAULT 0,
        last_retry_at TIMESTAMPTZ,
        status VARCHAR(20) NOT NULL DEFAULT 'error',
        worker_id TEXT
    )",
];

pub(crate) const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS transactions_block_number_idx ON transactions (block_number)",
    "CREATE INDEX IF NOT EXISTS transactions_block_timestamp_idx ON transactions (block_timestamp)",
    "CREATE INDEX IF NOT EXISTS transactions_from_address_idx ON transactions (from_address)",
    "CREATE INDEX IF NOT EXISTS transactions_to_address_idx ON transactions (to_address)",
    "CREATE INDEX IF NOT EXISTS transfers_block_number_idx ON transfers (block_number)",
    "CREATE INDEX IF NOT EXISTS transfers_block_timestamp_idx ON transfers (block_timestamp)",
    "CREATE INDEX IF NOT EXISTS transfers_token_address_idx ON transfers (token_address)",
    "CREATE INDEX IF NOT EXISTS transfers_from_address_idx ON transfers (from_address)",
    "CREATE INDEX IF NOT EXISTS transfers_to_address_idx ON transfers (to_address)",
    "CREATE INDEX IF NOT EXISTS approvals_token_address_idx ON approvals (token_address)",
    "CREATE INDEX IF NOT EXISTS swaps_pool_address_idx ON swaps (pool_address)",
    "CREATE INDEX IF NOT EXISTS swaps_block_number_idx ON swaps (block_number)",
    "CREATE INDEX IF NOT EXISTS nft_metadata_unfetched_idx ON nft_metadata (metadata_fetched) WHERE NOT metadata_fetched",
    "CREATE INDEX IF NOT EXISTS failed_jobs_status_type_idx ON failed_jobs (status, job_type)",
];

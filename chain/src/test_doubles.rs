//! Scriptable [`EthRpc`] double for worker and planner tests.

use {
    crate::{ChainBlock, ChainLog, ChainReceipt, EthRpc},
    std::{
        collections::{HashMap, VecDeque},
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StubRpcError {
    #[error("429 Too Many Requests")]
    RateLimited,
    #[error("query returned more than 10000 results")]
    TooManyResults,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Default)]
struct StubState {
    blocks: HashMap<u64, ChainBlock>,
    block_failures: VecDeque<StubRpcError>,
    receipts: HashMap<String, ChainReceipt>,
    code: HashMap<String, Vec<u8>>,
    log_batches: VecDeque<Result<Vec<ChainLog>, StubRpcError>>,
    symbols: HashMap<String, String>,
    names: HashMap<String, String>,
    decimals: HashMap<String, u8>,
    pool_tokens: HashMap<String, (String, String)>,
    pool_factories: HashMap<String, String>,
    calls: HashMap<&'static str, usize>,
}

/// In-memory chain the tests program ahead of time. Counts calls per
/// method so caching behavior is observable.
#[derive(Debug, Clone, Default)]
pub struct StubRpc {
    state: Arc<Mutex<StubState>>,
}

impl StubRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(self, block: ChainBlock) -> Self {
        self.state
            .lock()
            .unwrap()
            .blocks
            .insert(block.number, block);
        self
    }

    /// Queues failures returned by `block_by_number` before it starts
    /// serving the stored blocks.
    pub fn failing_block_fetches(self, failures: impl IntoIterator<Item = StubRpcError>) -> Self {
        self.state
            .lock()
            .unwrap()
            .block_failures
            .extend(failures);
        self
    }

    pub fn with_receipt(self, tx_hash: &str, receipt: ChainReceipt) -> Self {
        self.state
            .lock()
            .unwrap()
            .receipts
            .insert(tx_hash.to_owned(), receipt);
        self
    }

    pub fn with_code(self, address: &str, code: Vec<u8>) -> Self {
        self.state
            .lock()
            .unwrap()
            .code
            .insert(address.to_owned(), code);
        self
    }

    /// Queues one `eth_getLogs` response; each call consumes one entry.
    pub fn with_log_batch(self, batch: Result<Vec<ChainLog>, StubRpcError>) -> Self {
        self.state.lock().unwrap().log_batches.push_back(batch);
        self
    }

    pub fn with_symbol(self, address: &str, symbol: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .symbols
            .insert(address.to_owned(), symbol.to_owned());
        self
    }

    pub fn with_name(self, address: &str, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .names
            .insert(address.to_owned(), name.to_owned());
        self
    }

    pub fn with_decimals(self, address: &str, decimals: u8) -> Self {
        self.state
            .lock()
            .unwrap()
            .decimals
            .insert(address.to_owned(), decimals);
        self
    }

    pub fn with_pool(self, pool: &str, token0: &str, token1: &str, factory: Option<&str>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .pool_tokens
                .insert(pool.to_owned(), (token0.to_owned(), token1.to_owned()));
            if let Some(factory) = factory {
                state
                    .pool_factories
                    .insert(pool.to_owned(), factory.to_owned());
            }
        }
        self
    }

    pub fn call_count(&self, method: &'static str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, method: &'static str) {
        *self.state.lock().unwrap().calls.entry(method).or_insert(0) += 1;
    }

    fn lookup<T: Clone>(
        map: &HashMap<String, T>,
        key: &str,
        method: &'static str,
    ) -> Result<T, StubRpcError> {
        map.get(key)
            .cloned()
            .ok_or_else(|| StubRpcError::Other(format!("{method}: no entry for {key}")))
    }
}

impl EthRpc for StubRpc {
    type Err = StubRpcError;

    async fn block_by_number(
        &self,
        number: u64,
        _full: bool,
    ) -> Result<Option<ChainBlock>, Self::Err> {
        self.record("block_by_number");
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.block_failures.pop_front() {
            return Err(failure);
        }
        Ok(state.blocks.get(&number).cloned())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<ChainReceipt>, Self::Err> {
        self.record("transaction_receipt");
        Ok(self.state.lock().unwrap().receipts.get(tx_hash).cloned())
    }

    async fn code_at(&self, address: &str) -> Result<Vec<u8>, Self::Err> {
        self.record("code_at");
        Ok(self
            .state
            .lock()
            .unwrap()
            .code
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn logs(&self, _from_block: u64, _to_block: u64) -> Result<Vec<ChainLog>, Self::Err> {
        self.record("logs");
        self.state
            .lock()
            .unwrap()
            .log_batches
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn token_symbol(&self, address: &str) -> Result<String, Self::Err> {
        self.record("token_symbol");
        Self::lookup(&self.state.lock().unwrap().symbols, address, "token_symbol")
    }

    async fn token_name(&self, address: &str) -> Result<String, Self::Err> {
        self.record("token_name");
        Self::lookup(&self.state.lock().unwrap().names, address, "token_name")
    }

    async fn token_decimals(&self, address: &str) -> Result<u8, Self::Err> {
        self.record("token_decimals");
        Self::lookup(&self.state.lock().unwrap().decimals, address, "token_decimals")
    }

    async fn pool_token0(&self, address: &str) -> Result<String, Self::Err> {
        self.record("pool_token0");
        let state = self.state.lock().unwrap();
        Self::lookup(&state.pool_tokens, address, "pool_token0").map(|(token0, _)| token0)
    }

    async fn pool_token1(&self, address: &str) -> Result<String, Self::Err> {
        self.record("pool_token1");
        let state = self.state.lock().unwrap();
        Self::lookup(&state.pool_tokens, address, "pool_token1").map(|(_, token1)| token1)
    }

    async fn pool_factory(&self, address: &str) -> Result<String, Self::Err> {
        self.record("pool_factory");
        let state = self.state.lock().unwrap();
        Self::lookup(&state.pool_factories, address, "pool_factory")
    }

    fn is_rate_limited(err: &Self::Err) -> bool {
        matches!(err, StubRpcError::RateLimited)
    }

    fn is_result_set_too_large(err: &Self::Err) -> bool {
        matches!(err, StubRpcError::TooManyResults)
    }
}

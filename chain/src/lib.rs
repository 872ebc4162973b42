//! Upstream chain access.
//!
//! [`EthRpc`] is the seam the processors and the backfill planner work
//! against; [`AlloyRpc`] is the production implementation over an alloy
//! HTTP provider. Chain data crosses the boundary as plain domain types so
//! the workers and their tests never handle provider-specific structs.

pub use {
    client::{AlloyRpc, RpcClientError},
    oracle::{CryptoCompareOracle, DEFAULT_PRICE_ORACLE_URL, PriceOracle},
    types::{ChainBlock, ChainLog, ChainReceipt, ChainTransaction, log_from_rpc},
};

use std::error::Error as StdError;

mod client;
mod oracle;
mod types;

// Safety: Unwraps allowed here because
// (1) the stub is only compiled for tests
// (2) all unwraps come from `Mutex` poisoning, which should never happen
// if the rest of the code does not panic.
#[cfg(any(feature = "test-doubles", test))]
#[allow(clippy::unwrap_used)]
pub mod test_doubles;

#[allow(async_fn_in_trait)]
pub trait EthRpc {
    /// The associated error type for the upstream access operation.
    type Err: StdError + Send + Sync + 'static;

    /// `eth_getBlockByNumber`; `full` hydrates the transaction bodies.
    fn block_by_number(
        &self,
        number: u64,
        full: bool,
    ) -> impl ::std::future::Future<Output = Result<Option<ChainBlock>, Self::Err>> + Send;

    /// `eth_getTransactionReceipt`.
    fn transaction_receipt(&self, tx_hash: &str)
    -> impl ::std::future::Future<Output = Result<Option<ChainReceipt>, Self::Err>> + Send;

    /// `eth_getCode`.
    fn code_at(&self, address: &str) -> impl ::std::future::Future<Output = Result<Vec<u8>, Self::Err>> + Send;

    /// `eth_getLogs` over an inclusive block range.
    fn logs(&self, from_block: u64, to_block: u64) -> impl ::std::future::Future<Output = Result<Vec<ChainLog>, Self::Err>> + Send;

    /// ERC-20/721 `symbol()`.
    fn token_symbol(&self, address: &str) -> impl ::std::future::Future<Output = Result<String, Self::Err>> + Send;

    /// ERC-20/721/1155 `name()`.
    fn token_name(&self, address: &str) -> impl ::std::future::Future<Output = Result<String, Self::Err>> + Send;

    /// ERC-20 `decimals()`.
    fn token_decimals(&self, address: &str) -> impl ::std::future::Future<Output = Result<u8, Self::Err>> + Send;

    /// DEX pool `token0()`.
    fn pool_token0(&self, address: &str) -> impl ::std::future::Future<Output = Result<String, Self::Err>> + Send;

    /// DEX pool `token1()`.
    fn pool_token1(&self, address: &str) -> impl ::std::future::Future<Output = Result<String, Self::Err>> + Send;

    /// DEX pool `factory()`.
    fn pool_factory(&self, address: &str) -> impl ::std::future::Future<Output = Result<String, Self::Err>> + Send;

    /// Whether the upstream asked us to back off (HTTP 429).
    fn is_rate_limited(err: &Self::Err) -> bool;

    /// Whether a `getLogs` window was rejected for matching too many
    /// results, so the caller should shrink the window.
    fn is_result_set_too_large(err: &Self::Err) -> bool;
}

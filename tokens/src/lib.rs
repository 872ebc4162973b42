//! Token-level services shared by the worker families: the two-tier token
//! metadata cache, the TTL-cached ETH/USD price, and the DEX pool
//! registry.

pub use {
    dex::{
        PoolDirectory, SUSHISWAP_FACTORY, UNISWAP_V2_FACTORY, UNISWAP_V2_SWAP_SIGNATURE,
        UNISWAP_V3_FACTORY, UNISWAP_V3_SWAP_SIGNATURE, dex_name_for_factory,
    },
    metadata::{ResolvedToken, TokenDirectory},
    price::{ETH_PRICE_CACHE_KEY, EthPrice, UsdPrice},
};

#[cfg(any(feature = "test-doubles", test))]
pub use price::FixedPrice;

mod dex;
mod metadata;
mod price;

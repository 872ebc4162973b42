//! DEX pool resolution.
//!
//! Pools are anonymous contracts; their `token0`/`token1` pair and the
//! factory that deployed them are resolved once per pool per process and
//! cached for the process lifetime.

use {
    quarry_chain::EthRpc,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
};

/// keccak256("Swap(address,uint256,uint256,uint256,uint256,address)")
pub const UNISWAP_V2_SWAP_SIGNATURE: &str =
    "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822";

/// keccak256("Swap(address,address,int256,int256,uint160,uint128,int24)")
pub const UNISWAP_V3_SWAP_SIGNATURE: &str =
    "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67";

// Factory addresses on Ethereum mainnet.
pub const UNISWAP_V2_FACTORY: &str = "0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f";
pub const UNISWAP_V3_FACTORY: &str = "0x1f98431c8ad98523631ae4a59f267346ea31f984";
pub const SUSHISWAP_FACTORY: &str = "0xc0aee478e3658e2610c5f7a4a2e1777ce9e4f2ac";

/// Maps a pool's factory to the DEX it belongs to. Unknown factories
/// return `None`; callers pick their own fallback.
pub fn dex_name_for_factory(factory: Option<&str>) -> Option<&'static str> {
    match factory?.to_ascii_lowercase().as_str() {
        UNISWAP_V2_FACTORY => Some("uniswap_v2"),
        SUSHISWAP_FACTORY => Some("sushiswap"),
        UNISWAP_V3_FACTORY => Some("uniswap_v3"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct PoolDirectory<R> {
    rpc: R,
    tokens: Arc<Mutex<HashMap<String, (String, String)>>>,
    factories: Arc<Mutex<HashMap<String, String>>>,
}

impl<R: EthRpc> PoolDirectory<R> {
    pub fn new(rpc: R) -> Self {
        Self {
            rpc,
            tokens: Arc::default(),
            factories: Arc::default(),
        }
    }

    /// The pool's `(token0, token1)`, or `None` when the pool contract
    /// does not answer.
    pub async fn token_pair(&self, pool_address: &str) -> Option<(String, String)> {
        let pool = pool_address.to_ascii_lowercase();
        if let Some(pair) = self.tokens.lock().expect("pool cache poisoned").get(&pool) {
            return Some(pair.clone());
        }

        let token0 = self.rpc.pool_token0(&pool).await;
        let token1 = self.rpc.pool_token1(&pool).await;
        match (token0, token1) {
            (Ok(token0), Ok(token1)) => {
                let pair = (token0.to_ascii_lowercase(), token1.to_ascii_lowercase());
                self.tokens
                    .lock()
                    .expect("pool cache poisoned")
                    .insert(pool, pair.clone());
                Some(pair)
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Could not fetch pool tokens for {pool}: {e}");
                None
            }
        }
    }

    /// The factory that deployed the pool, if the pool exposes one.
    pub async fn factory(&self, pool_address: &str) -> Option<String> {
        let pool = pool_address.to_ascii_lowercase();
        if let Some(factory) = self
            .factories
            .lock()
            .expect("factory cache poisoned")
            .get(&pool)
        {
            return Some(factory.clone());
        }

        match self.rpc.pool_factory(&pool).await {
            Ok(factory) => {
                let factory = factory.to_ascii_lowercase();
                self.factories
                    .lock()
                    .expect("factory cache poisoned")
                    .insert(pool, factory.clone());
                Some(factory)
            }
            Err(e) => {
                tracing::warn!("Could not fetch pool factory for {pool}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, quarry_chain::test_doubles::StubRpc, test_case::test_case};

    const POOL: &str = "0x0000000000000000000000000000000000000001";
    const TOKEN0: &str = "0x0000000000000000000000000000000000000002";
    const TOKEN1: &str = "0x0000000000000000000000000000000000000003";

    #[test_case(Some(UNISWAP_V2_FACTORY), Some("uniswap_v2"))]
    #[test_case(Some(SUSHISWAP_FACTORY), Some("sushiswap"))]
    #[test_case(Some(UNISWAP_V3_FACTORY), Some("uniswap_v3"))]
    #[test_case(Some("0x000000000000000000000000000000000000dead"), None)]
    #[test_case(None, None)]
    fn test_dex_name_for_factory(factory: Option<&str>, expected: Option<&'static str>) {
        assert_eq!(dex_name_for_factory(factory), expected);
    }

    #[tokio::test]
    async fn test_pool_tokens_are_cached() {
        let rpc = StubRpc::new().with_pool(POOL, TOKEN0, TOKEN1, Some(UNISWAP_V2_FACTORY));
        let pools = PoolDirectory::new(rpc.clone());

        let pair = pools.token_pair(POOL).await.unwrap();
        assert_eq!(pair, (TOKEN0.to_owned(), TOKEN1.to_owned()));

        pools.token_pair(POOL).await.unwrap();
        assert_eq!(rpc.call_count("pool_token0"), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_pool_returns_none() {
        let pools = PoolDirectory::new(StubRpc::new());
        assert_eq!(pools.token_pair(POOL).await, None);
        assert_eq!(pools.factory(POOL).await, None);
    }

    #[tokio::test]
    async fn test_factory_resolution_feeds_the_name_table() {
        let rpc = StubRpc::new().with_pool(POOL, TOKEN0, TOKEN1, Some(SUSHISWAP_FACTORY));
        let pools = PoolDirectory::new(rpc);
        let factory = pools.factory(POOL).await;
        assert_eq!(dex_name_for_factory(factory.as_deref()), Some("sushiswap"));
    }
}

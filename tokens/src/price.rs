use {
    quarry_chain::PriceOracle,
    quarry_queue::ValueCache,
    std::time::Duration,
};

pub const ETH_PRICE_CACHE_KEY: &str = "eth_price";

/// The current ETH/USD price, or `None` when no valuation is available.
/// `None` propagates into null `value_usd`/`amount_usd` columns.
#[allow(async_fn_in_trait)]
pub trait UsdPrice {
    async fn eth_usd(&self) -> Option<f64>;
}

/// Price lookup with a short-lived cache shared by every worker through
/// the queue's value store, so a burst of transactions costs one oracle
/// round-trip per TTL window fleet-wide.
#[derive(Debug, Clone)]
pub struct EthPrice<C, O> {
    cache: C,
    oracle: O,
    ttl: Duration,
}

impl<C: ValueCache, O: PriceOracle> EthPrice<C, O> {
    pub fn new(cache: C, oracle: O, ttl: Duration) -> Self {
        Self { cache, oracle, ttl }
    }
}

impl<C: ValueCache, O: PriceOracle> UsdPrice for EthPrice<C, O> {
    async fn eth_usd(&self) -> Option<f64> {
        match self.cache.get(ETH_PRICE_CACHE_KEY).await {
            Ok(Some(cached)) => {
                if let Ok(price) = cached.parse::<f64>() {
                    return Some(price);
                }
                tracing::warn!("Discarding unparseable cached eth price: {cached}");
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Price cache read failed: {e}"),
        }

        match self.oracle.eth_usd().await {
            Ok(price) => {
                if let Err(e) = self
                    .cache
                    .put_ttl(ETH_PRICE_CACHE_KEY, &price.to_string(), self.ttl)
                    .await
                {
                    tracing::warn!("Price cache write failed: {e}");
                }
                Some(price)
            }
            Err(e) => {
                tracing::warn!("Price oracle unavailable: {e}");
                None
            }
        }
    }
}

/// Pins the price for tests.
#[cfg(any(feature = "test-doubles", test))]
#[derive(Debug, Clone, Copy)]
pub struct FixedPrice(pub Option<f64>);

#[cfg(any(feature = "test-doubles", test))]
impl UsdPrice for FixedPrice {
    async fn eth_usd(&self) -> Option<f64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        quarry_queue::InMemoryQueue,
        std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thiserror::Error,
    };

    #[derive(Debug, Error)]
    enum StubOracleError {
        #[error("oracle down")]
        Down,
    }

    #[derive(Clone, Default)]
    struct StubOracle {
        price: Option<f64>,
        calls: Arc<AtomicUsize>,
    }

    impl PriceOracle for StubOracle {
        type Err = StubOracleError;

        async fn eth_usd(&self) -> Result<f64, Self::Err> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.price.ok_or(StubOracleError::Down)
        }
    }

    #[tokio::test]
    async fn test_miss_queries_the_oracle_and_fills_the_cache() {
        let cache = InMemoryQueue::new();
        let oracle = StubOracle {
            price: Some(2000.0),
            calls: Arc::default(),
        };
        let price = EthPrice::new(cache, oracle.clone(), Duration::from_secs(10));

        assert_eq!(price.eth_usd().await, Some(2000.0));
        assert_eq!(price.eth_usd().await, Some(2000.0));
        // The second read came from the cache.
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oracle_failure_yields_no_valuation() {
        let price = EthPrice::new(
            InMemoryQueue::new(),
            StubOracle::default(),
            Duration::from_secs(10),
        );
        assert_eq!(price.eth_usd().await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_goes_back_to_the_oracle() {
        let cache = InMemoryQueue::new();
        let oracle = StubOracle {
            price: Some(1800.0),
            calls: Arc::default(),
        };
        let price = EthPrice::new(cache, oracle.clone(), Duration::ZERO);

        assert_eq!(price.eth_usd().await, Some(1800.0));
        assert_eq!(price.eth_usd().await, Some(1800.0));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }
}

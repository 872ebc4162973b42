use {serde::Deserialize, std::error::Error as StdError, std::time::Duration};

pub const DEFAULT_PRICE_ORACLE_URL: &str =
    "https://min-api.cryptocompare.com/data/price?fsym=ETH&tsyms=USD";

const ORACLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the current ETH/USD spot price. Callers treat a failure as
/// "no fiat valuation available" rather than a job failure.
#[allow(async_fn_in_trait)]
pub trait PriceOracle {
    type Err: StdError + Send + Sync + 'static;

    async fn eth_usd(&self) -> Result<f64, Self::Err>;
}

#[derive(Debug, Clone)]
pub struct CryptoCompareOracle {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(rename = "USD")]
    usd: f64,
}

impl CryptoCompareOracle {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(ORACLE_TIMEOUT).build()?,
            url: url.into(),
        })
    }
}

impl PriceOracle for CryptoCompareOracle {
    type Err = reqwest::Error;

    async fn eth_usd(&self) -> Result<f64, Self::Err> {
        let response: PriceResponse = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.usd)
    }
}

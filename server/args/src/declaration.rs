use {
    clap::{Args, Parser},
    serde::Deserialize,
    std::net::SocketAddr,
    thiserror::Error,
};

#[derive(PartialEq, Debug, Clone)]
pub struct Config {
    pub api: Api,
    pub db: Database,
    pub queue: Queue,
    pub chain: Chain,
    pub workers: Workers,
    pub price: Price,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Api {
    pub addr: SocketAddr,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Database {
    pub dsn: String,
    pub max_connections: u32,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Queue {
    pub dsn: String,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Chain {
    pub http_url: String,
    pub ws_url: String,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Workers {
    pub block_workers: u32,
    pub log_workers: u32,
    pub pop_timeout_secs: u64,
    pub recv_timeout_secs: u64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Price {
    pub oracle_url: String,
    pub ttl_secs: u64,
}

#[derive(Deserialize, Parser, PartialEq, Debug, Clone, Default)]
pub struct OptionalConfig {
    #[command(flatten)]
    pub api: Option<OptionalApi>,
    #[command(flatten)]
    pub db: Option<OptionalDatabase>,
    #[command(flatten)]
    pub queue: Option<OptionalQueue>,
    #[command(flatten)]
    pub chain: Option<OptionalChain>,
    #[command(flatten)]
    pub workers: Option<OptionalWorkers>,
    #[command(flatten)]
    pub price: Option<OptionalPrice>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalApi {
    #[arg(long = "api.addr", id = "api.addr")]
    pub addr: Option<SocketAddr>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalDatabase {
    #[arg(long = "db.dsn", id = "db.dsn")]
    pub dsn: Option<String>,
    #[arg(long = "db.max-connections", id = "db.max-connections")]
    pub max_connections: Option<u32>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalQueue {
    #[arg(long = "queue.dsn", id = "queue.dsn")]
    pub dsn: Option<String>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalChain {
    #[arg(long = "chain.http-url", id = "chain.http-url")]
    pub http_url: Option<String>,
    #[arg(long = "chain.ws-url", id = "chain.ws-url")]
    pub ws_url: Option<String>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalWorkers {
    #[arg(long = "workers.block-workers", id = "workers.block-workers")]
    pub block_workers: Option<u32>,
    #[arg(long = "workers.log-workers", id = "workers.log-workers")]
    pub log_workers: Option<u32>,
    #[arg(long = "workers.pop-timeout-secs", id = "workers.pop-timeout-secs")]
    pub pop_timeout_secs: Option<u64>,
    #[arg(long = "workers.recv-timeout-secs", id = "workers.recv-timeout-secs")]
    pub recv_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Args, PartialEq, Debug, Clone, Default)]
pub struct OptionalPrice {
    #[arg(long = "price.oracle-url", id = "price.oracle-url")]
    pub oracle_url: Option<String>,
    #[arg(long = "price.ttl-secs", id = "price.ttl-secs")]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Error)]
#[error("Missing field `{0}`")]
pub struct MissingField(&'static str);

impl TryFrom<OptionalConfig> for Config {
    type Error = MissingField;

    fn try_from(value: OptionalConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            api: value.api.ok_or(MissingField("api"))?.try_into()?,
            db: value.db.ok_or(MissingField("db"))?.try_into()?,
            queue: value.queue.ok_or(MissingField("queue"))?.try_into()?,
            chain: value.chain.ok_or(MissingField("chain"))?.try_into()?,
            workers: value.workers.ok_or(MissingField("workers"))?.try_into()?,
            price: value.price.ok_or(MissingField("price"))?.try_into()?,
        })
    }
}

impl TryFrom<OptionalApi> for Api {
    type Error = MissingField;

    fn try_from(value: OptionalApi) -> Result<Self, Self::Error> {
        Ok(Self {
            addr: value.addr.ok_or(MissingField("api.addr"))?,
        })
    }
}

impl TryFrom<OptionalDatabase> for Database {
    type Error = MissingField;

    fn try_from(value: OptionalDatabase) -> Result<Self, Self::Error> {
        Ok(Self {
            dsn: value.dsn.ok_or(MissingField("db.dsn"))?,
            max_connections: value
                .max_connections
                .ok_or(MissingField("db.max_connections"))?,
        })
    }
}

impl TryFrom<OptionalQueue> for Queue {
    type Error = MissingField;

    fn try_from(value: OptionalQueue) -> Result<Self, Self::Error> {
        Ok(Self {
            dsn: value.dsn.ok_or(MissingField("queue.dsn"))?,
        })
    }
}

impl TryFrom<OptionalChain> for Chain {
    type Error = MissingField;

    fn try_from(value: OptionalChain) -> Result<Self, Self::Error> {
        Ok(Self {
            http_url: value.http_url.ok_or(MissingField("chain.http_url"))?,
            ws_url: value.ws_url.ok_or(MissingField("chain.ws_url"))?,
        })
    }
}

impl TryFrom<OptionalWorkers> for Workers {
    type Error = MissingField;

    fn try_from(value: OptionalWorkers) -> Result<Self, Self::Error> {
        Ok(Self {
            block_workers: value
                .block_workers
                .ok_or(MissingField("workers.block_workers"))?,
            log_workers: value.log_workers.ok_or(MissingField("workers.log_workers"))?,
            pop_timeout_secs: value
                .pop_timeout_secs
                .ok_or(MissingField("workers.pop_timeout_secs"))?,
            recv_timeout_secs: value
                .recv_timeout_secs
                .ok_or(MissingField("workers.recv_timeout_secs"))?,
        })
    }
}

impl TryFrom<OptionalPrice> for Price {
    type Error = MissingField;

    fn try_from(value: OptionalPrice) -> Result<Self, Self::Error> {
        Ok(Self {
            oracle_url: value.oracle_url.ok_or(MissingField("price.oracle_url"))?,
            ttl_secs: value.ttl_secs.ok_or(MissingField("price.ttl_secs"))?,
        })
    }
}

impl OptionalConfig {
    /// Overlays `other` on top of `self`, field by field.
    pub fn apply(mut self, other: Self) -> Self {
        let Self {
            api,
            db,
            queue,
            chain,
            workers,
            price,
        } = other;

        self.api = merge(self.api, api, OptionalApi::apply);
        self.db = merge(self.db, db, OptionalDatabase::apply);
        self.queue = merge(self.queue, queue, OptionalQueue::apply);
        self.chain = merge(self.chain, chain, OptionalChain::apply);
        self.workers = merge(self.workers, workers, OptionalWorkers::apply);
        self.price = merge(self.price, price, OptionalPrice::apply);

        self
    }
}

fn merge<T>(ours: Option<T>, theirs: Option<T>, apply: impl FnOnce(T, T) -> T) -> Option<T> {
    match (ours, theirs) {
        (Some(ours), Some(theirs)) => Some(apply(ours, theirs)),
        (ours, theirs) => theirs.or(ours),
    }
}

impl OptionalApi {
    pub fn apply(mut self, other: Self) -> Self {
        let Self { addr } = other;
        self.addr = addr.or(self.addr);
        self
    }
}

impl OptionalDatabase {
    pub fn apply(mut self, other: Self) -> Self {
        let Self {
            dsn,
            max_connections,
        } = other;
        self.dsn = dsn.or(self.dsn);
        self.max_connections = max_connections.or(self.max_connections);
        self
    }
}

impl OptionalQueue {
    pub fn apply(mut self, other: Self) -> Self {
        let Self { dsn } = other;
        self.dsn = dsn.or(self.dsn);
        self
    }
}

impl OptionalChain {
    pub fn apply(mut self, other: Self) -> Self {
        let Self { http_url, ws_url } = other;
        self.http_url = http_url.or(self.http_url);
        self.ws_url = ws_url.or(self.ws_url);
        self
    }
}

impl OptionalWorkers {
    pub fn apply(mut self, other: Self) -> Self {
        let Self {
            block_workers,
            log_workers,
            pop_timeout_secs,
            recv_timeout_secs,
        } = other;
        self.block_workers = block_workers.or(self.block_workers);
        self.log_workers = log_workers.or(self.log_workers);
        self.pop_timeout_secs = pop_timeout_secs.or(self.pop_timeout_secs);
        self.recv_timeout_secs = recv_timeout_secs.or(self.recv_timeout_secs);
        self
    }
}

impl OptionalPrice {
    pub fn apply(mut self, other: Self) -> Self {
        let Self {
            oracle_url,
            ttl_secs,
        } = other;
        self.oracle_url = oracle_url.or(self.oracle_url);
        self.ttl_secs = ttl_secs.or(self.ttl_secs);
        self
    }
}

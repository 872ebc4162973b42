use {
    crate::{
        ConfigBuilder, Layer,
        declaration::{
            OptionalApi, OptionalChain, OptionalConfig, OptionalDatabase, OptionalPrice,
            OptionalQueue, OptionalWorkers,
        },
    },
    std::convert::Infallible,
};

struct StubLayer(OptionalConfig);

impl Layer for StubLayer {
    type Err = Infallible;

    fn try_load(self) -> Result<OptionalConfig, Self::Err> {
        Ok(self.0)
    }
}

fn complete_config() -> OptionalConfig {
    OptionalConfig {
        api: Some(OptionalApi {
            addr: "0.0.0.0:8080".parse().ok(),
        }),
        db: Some(OptionalDatabase {
            dsn: Some("postgres://base/quarry".to_owned()),
            max_connections: Some(8),
        }),
        queue: Some(OptionalQueue {
            dsn: Some("redis://base:6379".to_owned()),
        }),
        chain: Some(OptionalChain {
            http_url: Some("http://base:8545".to_owned()),
            ws_url: Some("ws://base:8546".to_owned()),
        }),
        workers: Some(OptionalWorkers {
            block_workers: Some(1),
            log_workers: Some(1),
            pop_timeout_secs: Some(5),
            recv_timeout_secs: Some(60),
        }),
        price: Some(OptionalPrice {
            oracle_url: Some("http://oracle".to_owned()),
            ttl_secs: Some(10),
        }),
    }
}

#[test]
fn test_later_layers_override_earlier_fields_and_keep_the_rest() {
    let overlay = OptionalConfig {
        chain: Some(OptionalChain {
            http_url: Some("http://overlay:8545".to_owned()),
            ws_url: None,
        }),
        ..Default::default()
    };

    let config = ConfigBuilder::new()
        .layer(StubLayer(complete_config()))
        .layer(StubLayer(overlay))
        .try_build()
        .unwrap();

    assert_eq!(config.chain.http_url, "http://overlay:8545");
    // The overlay left ws_url unset, so the base value survives.
    assert_eq!(config.chain.ws_url, "ws://base:8546");
    assert_eq!(config.queue.dsn, "redis://base:6379");
}

#[test]
fn test_missing_section_fails_the_build() {
    let mut partial = complete_config();
    partial.db = None;

    let err = ConfigBuilder::new()
        .layer(StubLayer(partial))
        .try_build()
        .unwrap_err();
    assert!(err.to_string().contains("db"));
}

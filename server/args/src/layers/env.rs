use {
    crate::{declaration::OptionalConfig, stack::Layer},
    std::{env, env::Vars},
};

#[derive(Debug, Clone, Default)]
pub struct EnvLayer<Vars>(Vars);

impl EnvLayer<Vars> {
    pub fn new() -> Self {
        Self(env::vars())
    }
}

impl<Vars: IntoIterator<Item = (K, K)>, K: AsRef<str>> Layer for EnvLayer<Vars> {
    type Err = serde_env::Error;

    fn try_load(self) -> Result<OptionalConfig, Self::Err> {
        serde_env::from_iter_with_prefix(self.0, "QUARRY")
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::declaration::{OptionalChain, OptionalDatabase},
    };

    #[test]
    fn test_env_layer_parses_prefixed_key_value_pairs() {
        let layer = EnvLayer(vec![
            ("QUARRY_DB_DSN", "postgres://localhost/quarry"),
            ("QUARRY_CHAIN_HTTP_URL", "http://localhost:8545"),
            ("QUARRY_CHAIN_WS_URL", "ws://localhost:8546"),
        ]);
        let actual_config = layer.try_load().unwrap();
        let expected_config = OptionalConfig {
            db: Some(OptionalDatabase {
                dsn: Some("postgres://localhost/quarry".to_owned()),
                max_connections: None,
            }),
            chain: Some(OptionalChain {
                http_url: Some("http://localhost:8545".to_owned()),
                ws_url: Some("ws://localhost:8546".to_owned()),
            }),
            ..Default::default()
        };

        assert_eq!(actual_config, expected_config);
    }
}

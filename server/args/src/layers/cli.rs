use {
    crate::{declaration::OptionalConfig, stack::Layer},
    clap::Parser,
    std::{
        env::{self, ArgsOs},
        ffi::OsString,
    },
};

#[derive(Debug, Clone, Default)]
pub struct CliLayer<Args>(Args);

impl CliLayer<ArgsOs> {
    pub fn new() -> Self {
        Self(env::args_os())
    }
}

impl<Args: IntoIterator<Item: Into<OsString> + Clone>> Layer for CliLayer<Args> {
    type Err = clap::Error;

    fn try_load(self) -> Result<OptionalConfig, Self::Err> {
        OptionalConfig::try_parse_from(self.0)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::declaration::{OptionalApi, OptionalQueue},
    };

    #[test]
    fn test_cli_layer_parses_arguments_successfully() {
        let layer = CliLayer(vec![
            "",
            "--api.addr",
            "0.0.0.0:8080",
            "--queue.dsn",
            "redis://localhost:6379",
        ]);
        let actual_config = layer.try_load().unwrap();
        let expected_config = OptionalConfig {
            api: Some(OptionalApi {
                addr: "0.0.0.0:8080".parse().ok(),
            }),
            queue: Some(OptionalQueue {
                dsn: Some("redis://localhost:6379".to_owned()),
            }),
            ..Default::default()
        };

        assert_eq!(actual_config, expected_config);
    }
}

use quarry_server_args::{CliLayer, ConfigBuilder, EnvLayer, FileLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ConfigBuilder::new()
        .layer(quarry_server::defaults())
        .layer(FileLayer::toml())
        .layer(EnvLayer::new())
        .layer(CliLayer::new())
        .try_build()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    quarry_server::run(config).await
}

//! Wires the production backends together and supervises the worker
//! tasks. One process runs every role; horizontal scale is more
//! processes against the same queue and database.

use {
    quarry_api::ApiContext,
    quarry_chain::{AlloyRpc, CryptoCompareOracle, DEFAULT_PRICE_ORACLE_URL},
    quarry_ingest::{BackfillPlanner, HeadPoller, LogPoller},
    quarry_process::{BlockProcessor, FailedJobs, LogProcessor},
    quarry_queue::RedisQueue,
    quarry_server_args::{
        Config, DefaultLayer, OptionalApi, OptionalConfig, OptionalDatabase, OptionalPrice,
        OptionalQueue, OptionalWorkers,
    },
    quarry_shared::JobType,
    quarry_storage_postgres::PgStore,
    quarry_tokens::EthPrice,
    std::time::Duration,
    tokio_util::sync::CancellationToken,
};

/// The bottom configuration layer. The database DSN and the chain URLs
/// have no sane defaults and must come from a higher layer.
pub fn defaults() -> DefaultLayer {
    DefaultLayer::new(OptionalConfig {
        api: Some(OptionalApi {
            addr: "0.0.0.0:8080".parse().ok(),
        }),
        db: Some(OptionalDatabase {
            dsn: None,
            max_connections: Some(8),
        }),
        queue: Some(OptionalQueue {
            dsn: Some("redis://127.0.0.1:6379".to_owned()),
        }),
        chain: None,
        workers: Some(OptionalWorkers {
            block_workers: Some(1),
            log_workers: Some(1),
            pop_timeout_secs: Some(5),
            recv_timeout_secs: Some(60),
        }),
        price: Some(OptionalPrice {
            oracle_url: Some(DEFAULT_PRICE_ORACLE_URL.to_owned()),
            ttl_secs: Some(10),
        }),
    })
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = PgStore::connect(&config.db.dsn, config.db.max_connections).await?;
    store.ensure_schema().await?;
    let queue = RedisQueue::connect(&config.queue.dsn).await?;
    let rpc = AlloyRpc::connect(&config.chain.http_url).await?;
    let oracle = CryptoCompareOracle::new(config.price.oracle_url.clone())?;
    let price = EthPrice::new(
        queue.clone(),
        oracle,
        Duration::from_secs(config.price.ttl_secs),
    );

    let pop_timeout = Duration::from_secs(config.workers.pop_timeout_secs);
    let recv_timeout = Duration::from_secs(config.workers.recv_timeout_secs);
    let shutdown = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    for index in 0..config.workers.block_workers {
        let worker = BlockProcessor::new(
            queue.clone(),
            store.clone(),
            rpc.clone(),
            price.clone(),
            format!("block-worker-{index}"),
            pop_timeout,
        );
        let token = shutdown.clone();
        tasks.spawn(async move { worker.run(token).await });
    }

    for index in 0..config.workers.log_workers {
        let worker = LogProcessor::new(
            queue.clone(),
            store.clone(),
            rpc.clone(),
            format!("log-worker-{index}"),
            pop_timeout,
        );
        let token = shutdown.clone();
        tasks.spawn(async move { worker.run(token).await });
    }

    let head_poller = HeadPoller::new(queue.clone(), config.chain.ws_url.clone(), recv_timeout);
    let token = shutdown.clone();
    tasks.spawn(async move { head_poller.run(token).await });

    let log_poller = LogPoller::new(queue.clone(), config.chain.ws_url.clone(), recv_timeout);
    let token = shutdown.clone();
    tasks.spawn(async move { log_poller.run(token).await });

    let ctx = ApiContext {
        planner: BackfillPlanner::new(queue.clone(), rpc.clone()),
        failed_blocks: FailedJobs::new(queue.clone(), store.clone(), JobType::Block),
        failed_logs: FailedJobs::new(queue.clone(), store.clone(), JobType::Log),
    };
    let (addr, server) = warp::serve(quarry_api::routes(ctx)).bind_with_graceful_shutdown(
        config.api.addr,
        {
            let token = shutdown.clone();
            async move { token.cancelled().await }
        },
    );
    tasks.spawn(server);
    tracing::info!("Admin API listening on {addr}");

    shutdown_signal().await;
    tracing::info!("Shutdown signal received; finishing in-flight jobs");
    shutdown.cancel();
    while tasks.join_next().await.is_some() {}
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!("Could not install SIGTERM handler: {e}");
                if let Err(e) = ctrl_c.await {
                    tracing::error!("Could not wait for ctrl-c: {e}");
                }
                return;
            }
        };
        tokio::select! {
            result = ctrl_c => {
                if let Err(e) = result {
                    tracing::error!("Could not wait for ctrl-c: {e}");
                }
            }
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            tracing::error!("Could not wait for ctrl-c: {e}");
        }
    }
}

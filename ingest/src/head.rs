use {
    crate::RECONNECT_BACKOFF,
    alloy::providers::{Provider, ProviderBuilder, WsConnect},
    futures::StreamExt,
    quarry_queue::JobQueue,
    quarry_shared::{
        BlockJob, Error, Job, JobStatus, QueueName, block_job_id, primitives::lower_hex_hash,
    },
    std::time::Duration,
    tokio_util::sync::CancellationToken,
};

/// Subscribes to `newHeads` and emits one block job per new head.
/// Duplicate heads are expected; the processors absorb them.
pub struct HeadPoller<Q> {
    queue: Q,
    ws_url: String,
    recv_timeout: Duration,
}

impl<Q: JobQueue> HeadPoller<Q> {
    pub fn new(queue: Q, ws_url: impl Into<String>, recv_timeout: Duration) -> Self {
        Self {
            queue,
            ws_url: ws_url.into(),
            recv_timeout,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            if let Err(e) = self.stream_heads(&shutdown).await {
                tracing::warn!("Head subscription dropped: {e}");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
        tracing::info!("Head poller stopped");
    }

    async fn stream_heads(&self, shutdown: &CancellationToken) -> Result<(), Error> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(self.ws_url.clone()))
            .await
            .map_err(Error::rpc)?;
        let subscription = provider.subscribe_blocks().await.map_err(Error::rpc)?;
        let mut stream = subscription.into_stream();
        tracing::info!("Connected to WebSocket: {}", self.ws_url);

        loop {
            let header = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = tokio::time::timeout(self.recv_timeout, stream.next()) => match next {
                    Ok(Some(header)) => header,
                    Ok(None) => return Err(Error::Rpc("head stream ended".to_owned())),
                    Err(_) => {
                        return Err(Error::Rpc(format!(
                            "no head received within {}s",
                            self.recv_timeout.as_secs()
                        )));
                    }
                },
            };

            let job = BlockJob {
                block_number: header.number,
                block_hash: lower_hex_hash(&header.hash),
                status: JobStatus::New,
            };
            tracing::info!("Pushing block {} into queue", job.block_number);
            self.queue
                .push(
                    QueueName::Blocks,
                    &block_job_id(job.block_number),
                    &Job::Block(job),
                )
                .await
                .map_err(Error::queue)?;
        }
    }
}

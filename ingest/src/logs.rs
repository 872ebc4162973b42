use {
    crate::RECONNECT_BACKOFF,
    alloy::{
        providers::{Provider, ProviderBuilder, WsConnect},
        rpc::types::Filter,
    },
    futures::StreamExt,
    quarry_chain::log_from_rpc,
    quarry_queue::JobQueue,
    quarry_shared::{Error, Job, QueueName, log_job_id},
    std::time::Duration,
    tokio_util::sync::CancellationToken,
};

/// Subscribes to the unfiltered `logs` stream and emits one log job per
/// event, fully denormalized so the processor needs no further chain
/// access for the event body.
pub struct LogPoller<Q> {
    queue: Q,
    ws_url: String,
    recv_timeout: Duration,
}

impl<Q: JobQueue> LogPoller<Q> {
    pub fn new(queue: Q, ws_url: impl Into<String>, recv_timeout: Duration) -> Self {
        Self {
            queue,
            ws_url: ws_url.into(),
            recv_timeout,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            if let Err(e) = self.stream_logs(&shutdown).await {
                tracing::warn!("Log subscription dropped: {e}");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
        tracing::info!("Log poller stopped");
    }

    async fn stream_logs(&self, shutdown: &CancellationToken) -> Result<(), Error> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(self.ws_url.clone()))
            .await
            .map_err(Error::rpc)?;
        let subscription = provider
            .subscribe_logs(&Filter::default())
            .await
            .map_err(Error::rpc)?;
        let mut stream = subscription.into_stream();
        tracing::info!("Connected to WebSocket: {}", self.ws_url);

        loop {
            let log = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = tokio::time::timeout(self.recv_timeout, stream.next()) => match next {
                    Ok(Some(log)) => log,
                    Ok(None) => return Err(Error::Rpc("log stream ended".to_owned())),
                    Err(_) => {
                        return Err(Error::Rpc(format!(
                            "no log received within {}s",
                            self.recv_timeout.as_secs()
                        )));
                    }
                },
            };

            // Pending logs have no block context yet; they re-arrive once
            // mined.
            if log.block_number.is_none() || log.transaction_hash.is_none() {
                continue;
            }
            let job = log_from_rpc(&log).into_job();
            let job_id = log_job_id(&job.transaction_hash, job.log_index);
            self.queue
                .push(QueueName::Logs, &job_id, &Job::Log(job))
                .await
                .map_err(Error::queue)?;
        }
    }
}

use {
    lru::LruCache,
    quarry_chain::EthRpc,
    quarry_queue::JobQueue,
    quarry_shared::{BlockJob, Job, JobStatus, QueueName, block_job_id, log_job_id},
    std::num::NonZeroUsize,
    thiserror::Error,
};

/// Hard cap on one backfill request.
pub const MAX_BACKFILL_RANGE: u64 = 50_000;

/// Hard cap on a blocks-only enqueue request.
pub const MAX_QUEUE_BLOCKS_RANGE: u64 = 10_000;

/// `getLogs` window width when the request does not choose one.
pub const DEFAULT_LOG_BATCH_SIZE: u64 = 100;

/// Halving the window below this width gives up on the range.
const MIN_LOG_BATCH_SIZE: u64 = 10;

const TIMESTAMP_CACHE_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillRequest {
    pub start: u64,
    pub end: u64,
    pub batch_size: u64,
}

impl BackfillRequest {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            batch_size: DEFAULT_LOG_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub blocks_queued: u64,
    pub logs_queued: u64,
    pub start_block: u64,
    pub end_block: u64,
}

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("{0}")]
    InvalidRange(String),
    /// The window shrank under the floor without a successful fetch.
    #[error("unable to fetch logs - too many logs even in small batches: {details}")]
    WindowExhausted {
        failed_at_block: u64,
        blocks_queued: u64,
        logs_queued: u64,
        details: String,
    },
    /// The chain failed the request for a non-shrinkable reason.
    #[error("failed to fetch logs from the chain: {details}")]
    Upstream {
        failed_at_block: u64,
        blocks_queued: u64,
        logs_queued: u64,
        details: String,
    },
    #[error("queue error: {0}")]
    Queue(String),
}

/// Plans a historical range: one block job per height, plus one log job
/// per event found by walking the range in `getLogs` windows. Windows
/// shrink by halves when the node refuses them and reset after each clean
/// fetch.
#[derive(Debug, Clone)]
pub struct BackfillPlanner<Q, R> {
    queue: Q,
    rpc: R,
}

impl<Q: JobQueue, R: EthRpc> BackfillPlanner<Q, R> {
    pub fn new(queue: Q, rpc: R) -> Self {
        Self { queue, rpc }
    }

    pub async fn plan(&self, request: BackfillRequest) -> Result<BackfillReport, BackfillError> {
        if request.batch_size < 1 || request.batch_size > 1000 {
            return Err(BackfillError::InvalidRange(
                "batch_size must be between 1 and 1000".to_owned(),
            ));
        }
        validate_range(request.start, request.end, MAX_BACKFILL_RANGE)?;

        let mut blocks_queued = 0;
        for number in request.start..=request.end {
            self.push_block_job(number).await?;
            blocks_queued += 1;
        }

        let mut timestamps = LruCache::new(
            NonZeroUsize::new(TIMESTAMP_CACHE_SIZE).expect("cache size is non-zero"),
        );
        let mut logs_queued = 0u64;
        let mut current = request.start;
        let mut window = request.batch_size;

        while current <= request.end {
            let batch_end = (current + window - 1).min(request.end);
            match self.rpc.logs(current, batch_end).await {
                Ok(logs) => {
                    for log in logs {
                        if log.transaction_hash.is_empty() {
                            continue;
                        }
                        let timestamp =
                            self.block_timestamp(log.block_number, &mut timestamps).await;
                        let mut job = log.into_job();
                        job.block_timestamp = Some(timestamp);
                        let job_id = log_job_id(&job.transaction_hash, job.log_index);
                        self.queue
                            .push(QueueName::Logs, &job_id, &Job::Log(job))
                            .await
                            .map_err(|e| BackfillError::Queue(e.to_string()))?;
                        logs_queued += 1;
                    }
                    current = batch_end + 1;
                    window = request.batch_size;
                }
                Err(e) if R::is_result_set_too_large(&e) || R::is_rate_limited(&e) => {
                    window = (window / 2).max(1);
                    if window < MIN_LOG_BATCH_SIZE {
                        return Err(BackfillError::WindowExhausted {
                            failed_at_block: current,
                            blocks_queued,
                            logs_queued,
                            details: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        "Shrinking getLogs window to {window} blocks at {current}: {e}"
                    );
                }
                Err(e) => {
                    return Err(BackfillError::Upstream {
                        failed_at_block: current,
                        blocks_queued,
                        logs_queued,
                        details: e.to_string(),
                    });
                }
            }
        }

        Ok(BackfillReport {
            blocks_queued,
            logs_queued,
            start_block: request.start,
            end_block: request.end,
        })
    }

    /// Enqueues block jobs only, for ranges whose logs are not wanted.
    pub async fn queue_blocks(&self, start: u64, end: u64) -> Result<u64, BackfillError> {
        validate_range(start, end, MAX_QUEUE_BLOCKS_RANGE)?;
        let mut queued = 0;
        for number in start..=end {
            self.push_block_job(number).await?;
            queued += 1;
        }
        Ok(queued)
    }

    async fn push_block_job(&self, number: u64) -> Result<(), BackfillError> {
        let job = Job::Block(BlockJob {
            block_number: number,
            // The processor canonicalizes against getBlock(number).
            block_hash: String::new(),
            status: JobStatus::New,
        });
        self.queue
            .push(QueueName::Blocks, &block_job_id(number), &job)
            .await
            .map_err(|e| BackfillError::Queue(e.to_string()))
    }

    async fn block_timestamp(&self, number: u64, cache: &mut LruCache<u64, u64>) -> u64 {
        if let Some(timestamp) = cache.get(&number) {
            return *timestamp;
        }
        let timestamp = match self.rpc.block_by_number(number, false).await {
            Ok(Some(block)) => block.timestamp,
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("Could not fetch timestamp for block {number}: {e}");
                0
            }
        };
        cache.put(number, timestamp);
        timestamp
    }
}

fn validate_range(start: u64, end: u64, max_range: u64) -> Result<(), BackfillError> {
    if start > end {
        return Err(BackfillError::InvalidRange(
            "start must be <= end".to_owned(),
        ));
    }
    let span = end - start + 1;
    if span > max_range {
        return Err(BackfillError::InvalidRange(format!(
            "range too large. Maximum {max_range} blocks allowed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        quarry_chain::{
            ChainBlock, ChainLog,
            test_doubles::{StubRpc, StubRpcError},
        },
        quarry_queue::InMemoryQueue,
        std::time::Duration,
        test_case::test_case,
    };

    fn planner(queue: &InMemoryQueue, rpc: &StubRpc) -> BackfillPlanner<InMemoryQueue, StubRpc> {
        BackfillPlanner::new(queue.clone(), rpc.clone())
    }

    fn bare_block(number: u64, timestamp: u64) -> ChainBlock {
        ChainBlock {
            number,
            hash: format!("0x{number:064x}"),
            timestamp,
            base_fee_per_gas: None,
            transactions: Vec::new(),
        }
    }

    fn chain_log(block_number: u64, log_index: u64) -> ChainLog {
        ChainLog {
            address: "0xtoken".to_owned(),
            block_number,
            block_hash: format!("0x{block_number:064x}"),
            block_timestamp: None,
            data: "0x".to_owned(),
            log_index,
            topics: Vec::new(),
            transaction_hash: format!("0xtx{block_number}"),
            transaction_index: Some(0),
        }
    }

    #[tokio::test]
    async fn test_plan_queues_blocks_and_timestamped_logs() {
        let queue = InMemoryQueue::new();
        let rpc = StubRpc::new()
            .with_block(bare_block(3, 1_111))
            .with_log_batch(Ok(vec![chain_log(3, 0), chain_log(3, 1)]))
            .with_log_batch(Ok(Vec::new()));
        let planner = planner(&queue, &rpc);

        let report = planner
            .plan(BackfillRequest::new(0, 9).with_batch_size(5))
            .await
            .unwrap();

        assert_eq!(report.blocks_queued, 10);
        assert_eq!(report.logs_queued, 2);
        assert_eq!(report.start_block, 0);
        assert_eq!(report.end_block, 9);
        assert_eq!(queue.len(QueueName::Blocks), 10);
        assert_eq!(queue.len(QueueName::Logs), 2);
        // Two logs in the same block cost one timestamp lookup.
        assert_eq!(rpc.call_count("block_by_number"), 1);

        let popped = queue
            .pop(QueueName::Logs, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let Some(Job::Log(job)) = popped.job else {
            panic!("expected a log job");
        };
        assert_eq!(job.block_timestamp, Some(1_111));
    }

    #[tokio::test]
    async fn test_refused_window_halves_and_recovers() {
        let queue = InMemoryQueue::new();
        let rpc = StubRpc::new()
            .with_log_batch(Err(StubRpcError::TooManyResults))
            .with_log_batch(Ok(Vec::new()))
            .with_log_batch(Ok(Vec::new()));
        let planner = planner(&queue, &rpc);

        let report = planner
            .plan(BackfillRequest::new(0, 39).with_batch_size(40))
            .await
            .unwrap();
        assert_eq!(report.blocks_queued, 40);
        // First window refused at width 40, retried at 20, then the
        // remaining range went through at the reset width.
        assert_eq!(rpc.call_count("logs"), 3);
    }

    #[tokio::test]
    async fn test_window_shrinking_under_the_floor_reports_progress() {
        let queue = InMemoryQueue::new();
        let rpc = StubRpc::new().with_log_batch(Err(StubRpcError::TooManyResults));
        let planner = planner(&queue, &rpc);

        let err = planner
            .plan(BackfillRequest::new(100, 115).with_batch_size(16))
            .await
            .unwrap_err();
        let BackfillError::WindowExhausted {
            failed_at_block,
            blocks_queued,
            logs_queued,
            ..
        } = err
        else {
            panic!("expected WindowExhausted, got {err:?}");
        };
        assert_eq!(failed_at_block, 100);
        assert_eq!(blocks_queued, 16);
        assert_eq!(logs_queued, 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_reports_partial_progress() {
        let queue = InMemoryQueue::new();
        let rpc = StubRpc::new()
            .with_log_batch(Ok(vec![chain_log(0, 0)]))
            .with_log_batch(Err(StubRpcError::Other("node exploded".to_owned())));
        let planner = planner(&queue, &rpc);

        let err = planner
            .plan(BackfillRequest::new(0, 19).with_batch_size(10))
            .await
            .unwrap_err();
        let BackfillError::Upstream {
            failed_at_block,
            logs_queued,
            ..
        } = err
        else {
            panic!("expected Upstream, got {err:?}");
        };
        assert_eq!(failed_at_block, 10);
        assert_eq!(logs_queued, 1);
    }

    #[test_case(10, 9, "start must be <= end")]
    #[test_case(0, MAX_BACKFILL_RANGE, "range too large")]
    fn test_invalid_ranges_are_rejected(start: u64, end: u64, message: &str) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let queue = InMemoryQueue::new();
        let rpc = StubRpc::new();
        let planner = planner(&queue, &rpc);
        let err = rt
            .block_on(planner.plan(BackfillRequest::new(start, end)))
            .unwrap_err();
        assert!(err.to_string().contains(message), "{err}");
    }

    #[tokio::test]
    async fn test_batch_size_bounds_are_enforced() {
        let queue = InMemoryQueue::new();
        let rpc = StubRpc::new();
        let planner = planner(&queue, &rpc);
        let err = planner
            .plan(BackfillRequest::new(0, 1).with_batch_size(1001))
            .await
            .unwrap_err();
        assert!(matches!(err, BackfillError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_queue_blocks_honors_its_own_cap() {
        let queue = InMemoryQueue::new();
        let rpc = StubRpc::new();
        let planner = planner(&queue, &rpc);

        assert_eq!(planner.queue_blocks(5, 9).await.unwrap(), 5);
        assert_eq!(queue.len(QueueName::Blocks), 5);

        let err = planner
            .queue_blocks(0, MAX_QUEUE_BLOCKS_RANGE)
            .await
            .unwrap_err();
        assert!(matches!(err, BackfillError::InvalidRange(_)));
    }
}

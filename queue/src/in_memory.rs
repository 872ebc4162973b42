use {
    crate::{JobQueue, PoppedJob, ValueCache},
    quarry_shared::{Job, QueueName},
    std::{
        collections::{HashMap, VecDeque},
        convert::Infallible,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
    tokio::sync::Notify,
};

/// Queue backend that keeps everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<QueueName, VecDeque<String>>,
    payloads: HashMap<String, String>,
    values: HashMap<String, (String, Instant)>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids currently waiting on a queue.
    pub fn len(&self, queue: QueueName) -> usize {
        self.inner
            .lock()
            .unwrap()
            .queues
            .get(&queue)
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, queue: QueueName) -> bool {
        self.len(queue) == 0
    }

    /// Whether a payload is still stored for `job_id`.
    pub fn has_payload(&self, job_id: &str) -> bool {
        self.inner.lock().unwrap().payloads.contains_key(job_id)
    }

    /// Drops the payload while leaving the queued id in place, simulating
    /// an expired entry.
    pub fn expire_payload(&self, job_id: &str) {
        self.inner.lock().unwrap().payloads.remove(job_id);
    }
}

impl JobQueue for InMemoryQueue {
    type Err = Infallible;

    async fn push(&self, queue: QueueName, job_id: &str, job: &Job) -> Result<(), Self::Err> {
        let payload = serde_json::to_string(job).unwrap();
        let mut inner = self.inner.lock().unwrap();
        inner.payloads.insert(job_id.to_owned(), payload);
        inner
            .queues
            .entry(queue)
            .or_default()
            .push_back(job_id.to_owned());
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(
        &self,
        queue: QueueName,
        timeout: Duration,
    ) -> Result<Option<PoppedJob>, Self::Err> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(job_id) = inner.queues.entry(queue).or_default().pop_front() {
                    let job = inner
                        .payloads
                        .get(&job_id)
                        .map(|raw| serde_json::from_str(raw).unwrap());
                    return Ok(Some(PoppedJob { job_id, job }));
                }
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
            else {
                return Ok(None);
            };
            // A lapsed timeout just re-checks the queue one final time above.
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn ack(&self, job_id: &str) -> Result<(), Self::Err> {
        self.inner.lock().unwrap().payloads.remove(job_id);
        Ok(())
    }
}

impl ValueCache for InMemoryQueue {
    type Err = Infallible;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Err> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn put_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Err> {
        self.inner
            .lock()
            .unwrap()
            .values
            .insert(key.to_owned(), (value.to_owned(), Instant::now() + ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        quarry_shared::{BlockJob, JobStatus},
    };

    fn block_job(number: u64) -> Job {
        Job::Block(BlockJob {
            block_number: number,
            block_hash: String::new(),
            status: JobStatus::New,
        })
    }

    #[tokio::test]
    async fn test_pop_is_fifo_within_one_queue() {
        let queue = InMemoryQueue::new();
        queue
            .push(QueueName::Blocks, "block:1", &block_job(1))
            .await
            .unwrap();
        queue
            .push(QueueName::Blocks, "block:2", &block_job(2))
            .await
            .unwrap();

        let first = queue
            .pop(QueueName::Blocks, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let second = queue
            .pop(QueueName::Blocks, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.job_id, "block:1");
        assert_eq!(second.job_id, "block:2");
        assert_eq!(second.job, Some(block_job(2)));
    }

    #[tokio::test]
    async fn test_pop_times_out_on_an_empty_queue() {
        let queue = InMemoryQueue::new();
        let popped = queue
            .pop(QueueName::Logs, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_expired_payload_pops_with_no_job() {
        let queue = InMemoryQueue::new();
        queue
            .push(QueueName::Blocks, "block:9", &block_job(9))
            .await
            .unwrap();
        queue.expire_payload("block:9");

        let popped = queue
            .pop(QueueName::Blocks, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.job_id, "block:9");
        assert_eq!(popped.job, None);
    }

    #[tokio::test]
    async fn test_duplicate_push_keeps_latest_payload() {
        let queue = InMemoryQueue::new();
        queue
            .push(QueueName::Blocks, "block:1", &block_job(1))
            .await
            .unwrap();
        let retried = block_job(1).into_retrying();
        queue
            .push(QueueName::Blocks, "block:1", &retried)
            .await
            .unwrap();

        let popped = queue
            .pop(QueueName::Blocks, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.job, Some(retried));
        // The id was enqueued twice; both entries resolve to the same data.
        assert_eq!(queue.len(QueueName::Blocks), 1);
    }

    #[tokio::test]
    async fn test_ack_deletes_the_payload() {
        let queue = InMemoryQueue::new();
        queue
            .push(QueueName::Blocks, "block:3", &block_job(3))
            .await
            .unwrap();
        queue.ack("block:3").await.unwrap();
        assert!(!queue.has_payload("block:3"));
    }

    #[tokio::test]
    async fn test_value_cache_honors_ttl() {
        let queue = InMemoryQueue::new();
        queue
            .put_ttl("eth_price", "2000.0", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            queue.get("eth_price").await.unwrap(),
            Some("2000.0".to_owned())
        );

        queue
            .put_ttl("eth_price", "2000.0", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(queue.get("eth_price").await.unwrap(), None);
    }
}

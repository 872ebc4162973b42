use {
    quarry_queue::JobQueue,
    quarry_shared::{Error, Job, JobType},
    quarry_store::{FailedJobRecord, Store, WorkerStatus},
};

/// The dead-letter path of one queue: records failures durably, redrives
/// them back onto the queue, and removes rows once a retry succeeds.
#[derive(Debug, Clone)]
pub struct FailedJobs<Q, S> {
    queue: Q,
    store: S,
    job_type: JobType,
}

impl<Q: JobQueue, S: Store> FailedJobs<Q, S> {
    pub fn new(queue: Q, store: S, job_type: JobType) -> Self {
        Self {
            queue,
            store,
            job_type,
        }
    }

    /// Persists a failure. Returns `true` only once the row is durable;
    /// callers must not ack the queue job otherwise.
    pub async fn record(
        &self,
        job_id: &str,
        job: &Job,
        error: &str,
        worker_id: Option<&str>,
    ) -> bool {
        let data = match serde_json::to_value(job) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Could not serialize payload of {job_id}: {e}");
                return false;
            }
        };
        let record = FailedJobRecord {
            job_id: job_id.to_owned(),
            queue_name: self.job_type.queue().as_str().to_owned(),
            job_type: self.job_type,
            data,
            error: error.to_owned(),
            retries: 0,
            last_retry_at: None,
            status: WorkerStatus::Error,
            worker_id: worker_id.map(str::to_owned),
        };
        match self.store.record_failed_job(&record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed trying to add {job_id} to failed_jobs table: {e}");
                false
            }
        }
    }

    /// Republishes every errored job of this type back onto its source
    /// queue with a `retrying` payload marker. Returns how many were
    /// pushed.
    pub async fn redrive(&self) -> Result<usize, Error> {
        let jobs = self
            .store
            .failed_jobs(self.job_type)
            .await
            .map_err(Error::storage)?;
        let queue_name = self.job_type.queue();
        let mut pushed = 0;
        for failed in jobs {
            let job: Job = match serde_json::from_value(failed.data.clone()) {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!(
                        "Skipping dead-letter row {} with undecodable payload: {e}",
                        failed.job_id
                    );
                    continue;
                }
            };
            self.queue
                .push(queue_name, &failed.job_id, &job.into_retrying())
                .await
                .map_err(Error::queue)?;
            self.store
                .mark_retrying(&failed.job_id)
                .await
                .map_err(Error::storage)?;
            pushed += 1;
        }
        tracing::info!("Pushed {pushed} jobs to '{queue_name}' queue for retry");
        Ok(pushed)
    }

    /// Clears the dead-letter row after a redriven job committed.
    pub async fn remove(&self, job_id: &str) -> Result<bool, Error> {
        self.store
            .remove_failed_job(job_id)
            .await
            .map_err(Error::storage)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        quarry_queue::InMemoryQueue,
        quarry_shared::{BlockJob, JobStatus, QueueName},
        quarry_store::InMemoryStore,
        std::time::Duration,
    };

    fn manager(
        queue: &InMemoryQueue,
        store: &InMemoryStore,
    ) -> FailedJobs<InMemoryQueue, InMemoryStore> {
        FailedJobs::new(queue.clone(), store.clone(), JobType::Block)
    }

    fn block_job(number: u64) -> Job {
        Job::Block(BlockJob {
            block_number: number,
            block_hash: String::new(),
            status: JobStatus::New,
        })
    }

    #[tokio::test]
    async fn test_redrive_republishes_with_retrying_marker() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let failed = manager(&queue, &store);

        assert!(failed.record("block:5", &block_job(5), "boom", Some("w1")).await);
        let pushed = failed.redrive().await.unwrap();
        assert_eq!(pushed, 1);

        let popped = queue
            .pop(QueueName::Blocks, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.job_id, "block:5");
        assert!(popped.job.unwrap().is_retry());

        let row = store.failed_job("block:5").unwrap();
        assert_eq!(row.status, WorkerStatus::Retrying);
        assert_eq!(row.retries, 1);
    }

    #[tokio::test]
    async fn test_redrive_skips_jobs_of_other_types() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let blocks = manager(&queue, &store);
        let logs = FailedJobs::new(queue.clone(), store.clone(), JobType::Log);

        assert!(blocks.record("block:1", &block_job(1), "boom", None).await);
        assert_eq!(logs.redrive().await.unwrap(), 0);
        assert!(queue.is_empty(QueueName::Logs));
    }

    #[tokio::test]
    async fn test_remove_clears_the_row() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let failed = manager(&queue, &store);

        assert!(failed.record("block:9", &block_job(9), "boom", None).await);
        assert!(failed.remove("block:9").await.unwrap());
        assert!(store.failed_job("block:9").is_none());
    }
}

use {
    ::redis::{AsyncCommands, Client, aio::ConnectionManager},
    crate::{JobQueue, PoppedJob, ValueCache},
    quarry_shared::{Job, QueueName},
    std::time::Duration,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum RedisQueueError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("job payload codec: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Queue backend over Redis: `SET` + `RPUSH` to publish, `BLPOP` + `GET`
/// to consume, `DEL` to acknowledge. The connection manager reconnects
/// transparently, so worker loops do not handle connection state.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue").finish_non_exhaustive()
    }
}

impl RedisQueue {
    pub async fn connect(url: &str) -> Result<Self, RedisQueueError> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

impl JobQueue for RedisQueue {
    type Err = RedisQueueError;

    async fn push(&self, queue: QueueName, job_id: &str, job: &Job) -> Result<(), Self::Err> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        // The payload must be readable before the id becomes poppable.
        conn.set::<_, _, ()>(job_id, payload).await?;
        conn.rpush::<_, _, ()>(queue.as_str(), job_id).await?;
        Ok(())
    }

    async fn pop(
        &self,
        queue: QueueName,
        timeout: Duration,
    ) -> Result<Option<PoppedJob>, Self::Err> {
        let mut conn = self.conn.clone();
        let entry: Option<(String, String)> = conn
            .blpop(queue.as_str(), timeout.as_secs_f64())
            .await?;
        let Some((_, job_id)) = entry else {
            return Ok(None);
        };
        let raw: Option<String> = conn.get(&job_id).await?;
        let job = raw.as_deref().map(serde_json::from_str).transpose()?;
        Ok(Some(PoppedJob { job_id, job }))
    }

    async fn ack(&self, job_id: &str) -> Result<(), Self::Err> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(job_id).await?;
        Ok(())
    }
}

impl ValueCache for RedisQueue {
    type Err = RedisQueueError;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Err> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn put_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Err> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}

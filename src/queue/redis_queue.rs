use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::queue::{decode, DurableQueue, QueueError};
use crate::scheduler::Job;

/// Jobs stored as JSON strings in a Redis list: RPUSH to enqueue, BLPOP to dequeue.
///
/// Pops run on their own connection. A blocked BLPOP would otherwise stall
/// every enqueue multiplexed on the same socket.
#[derive(Clone)]
pub struct RedisQueue {
    push_conn: ConnectionManager,
    pop_conn: ConnectionManager,
    key: String,
    pop_timeout: Duration,
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("key", &self.key)
            .field("pop_timeout", &self.pop_timeout)
            .finish()
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

impl RedisQueue {
    /// Connect and verify the server answers PING.
    pub async fn connect(url: &str, key: &str, pop_timeout: Duration) -> Result<Self, QueueError> {
        tracing::info!(key, "Connecting to Redis queue");

        let client = redis::Client::open(url)?;
        let push_conn = ConnectionManager::new(client.clone()).await?;
        let pop_conn = ConnectionManager::new(client).await?;

        let mut probe = push_conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut probe).await?;

        tracing::info!(key, "Connected to Redis queue");
        Ok(Self {
            push_conn,
            pop_conn,
            key: key.to_string(),
            pop_timeout,
        })
    }
}

#[async_trait]
impl DurableQueue for RedisQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let record = job.to_record().map_err(QueueError::Encode)?;
        let mut conn = self.push_conn.clone();
        redis::cmd("RPUSH")
            .arg(&self.key)
            .arg(record)
            .query_async::<_, ()>(&mut conn)
            .await?;
        tracing::debug!(job_id = %job.id, key = %self.key, "RPUSH job");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut conn = self.pop_conn.clone();
        // BLPOP takes fractional seconds; 0 would block forever
        let timeout_secs = self.pop_timeout.as_secs_f64().max(0.01);
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.key)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match popped {
            Some((_key, record)) => decode(record).map(Some),
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.push_conn.clone();
        let len: usize = redis::cmd("LLEN")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

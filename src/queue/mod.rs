//! Durable FIFO of jobs awaiting dispatch.
//!
//! The queue holds serialized copies of jobs; the coordinator's [`JobStore`]
//! stays authoritative for status. Two backends are provided:
//!
//! - [`RedisQueue`]: RPUSH / BLPOP on a Redis list
//! - [`MemoryQueue`]: in-process, for tests and single-process runs
//!
//! [`JobStore`]: crate::scheduler::JobStore

pub mod memory;
pub mod redis_queue;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{QueueBackend, QueueConfig};
use crate::scheduler::Job;

pub use self::memory::MemoryQueue;
pub use self::redis_queue::RedisQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode job: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed job record {record:?}: {source}")]
    Decode {
        record: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Append a job to the tail of the queue.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    /// Pop the head of the queue, waiting up to the backend's pop timeout.
    ///
    /// `Ok(None)` means nothing arrived in time. A record that fails to decode
    /// has already been removed and is reported as [`QueueError::Decode`].
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Number of records currently queued.
    async fn len(&self) -> Result<usize, QueueError>;
}

/// Build the configured backend. Fails if a Redis backend cannot be reached.
pub async fn connect(config: &QueueConfig) -> Result<Arc<dyn DurableQueue>, QueueError> {
    match &config.backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryQueue::new(config.pop_timeout))),
        QueueBackend::Redis { url } => {
            let queue = RedisQueue::connect(url, &config.key, config.pop_timeout).await?;
            Ok(Arc::new(queue))
        }
    }
}

pub(crate) fn decode(record: String) -> Result<Job, QueueError> {
    Job::from_record(&record).map_err(|source| QueueError::Decode { record, source })
}

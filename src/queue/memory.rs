use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::queue::{decode, DurableQueue, QueueError};
use crate::scheduler::Job;

/// In-process queue with the same contract as the Redis backend.
///
/// Records are stored serialized so decode failures behave like they do with
/// a real backend. `set_available(false)` makes every call fail, which lets
/// tests exercise the unavailable-backend paths.
#[derive(Debug)]
pub struct MemoryQueue {
    records: Mutex<VecDeque<String>>,
    notify: Notify,
    pop_timeout: Duration,
    available: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl MemoryQueue {
    pub fn new(pop_timeout: Duration) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            pop_timeout,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Append an arbitrary record, bypassing encoding.
    pub async fn push_raw(&self, record: impl Into<String>) {
        self.records.lock().await.push_back(record.into());
        self.notify.notify_one();
    }

    /// Decoded copies of everything queued, head first.
    pub async fn snapshot(&self) -> Vec<Job> {
        self.records
            .lock()
            .await
            .iter()
            .filter_map(|r| Job::from_record(r).ok())
            .collect()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("memory queue disabled".to_string()))
        }
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        self.check_available()?;
        let record = job.to_record().map_err(QueueError::Encode)?;
        self.records.lock().await.push_back(record);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let deadline = tokio::time::Instant::now() + self.pop_timeout;
        loop {
            self.check_available()?;

            // Register for a wakeup before looking, so a push in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.records.lock().await.pop_front() {
                return decode(record).map(Some);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        self.check_available()?;
        Ok(self.records.lock().await.len())
    }
}

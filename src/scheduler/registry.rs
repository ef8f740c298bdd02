use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Liveness record for one worker
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub id: String,
    /// `host:port` of the worker's task endpoint
    pub address: String,
    pub last_heartbeat: Instant,
    /// Tasks this worker has accepted since it registered
    pub dispatched: u64,
}

impl WorkerEntry {
    pub fn new(id: String, address: String) -> Self {
        Self {
            id,
            address,
            last_heartbeat: Instant::now(),
            dispatched: 0,
        }
    }

    pub fn update_heartbeat(&mut self, address: String) {
        self.last_heartbeat = Instant::now();
        self.address = address;
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() <= timeout
    }
}

/// In-memory map of live workers, keyed by the id each worker picks for itself.
///
/// Workers register lazily: the first heartbeat creates the entry. Selection is
/// round-robin over live workers in id order; the cursor is atomic so
/// `pick_worker` only needs shared access.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, WorkerEntry>,
    worker_timeout: Duration,
    cursor: AtomicUsize,
}

impl WorkerRegistry {
    pub fn new(worker_timeout: Duration) -> Self {
        Self {
            workers: BTreeMap::new(),
            worker_timeout,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Insert or refresh a worker. Returns true if the worker was not registered.
    pub fn record_heartbeat(&mut self, worker_id: &str, address: &str) -> bool {
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.update_heartbeat(address.to_string());
            false
        } else {
            self.workers.insert(
                worker_id.to_string(),
                WorkerEntry::new(worker_id.to_string(), address.to_string()),
            );
            tracing::info!(worker_id, address, "Worker registered");
            true
        }
    }

    /// Next live worker in round-robin order, or `None` if there is none.
    pub fn pick_worker(&self) -> Option<WorkerEntry> {
        let live: Vec<&WorkerEntry> = self
            .workers
            .values()
            .filter(|w| w.is_alive(self.worker_timeout))
            .collect();
        if live.is_empty() {
            return None;
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % live.len();
        Some(live[slot].clone())
    }

    pub fn record_dispatch(&mut self, worker_id: &str) {
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.dispatched += 1;
        }
    }

    /// Remove every worker whose last heartbeat is older than the timeout.
    pub fn evict_stale(&mut self) -> Vec<String> {
        let timeout = self.worker_timeout;
        let dead: Vec<String> = self
            .workers
            .values()
            .filter(|w| !w.is_alive(timeout))
            .map(|w| w.id.clone())
            .collect();
        for id in &dead {
            self.workers.remove(id);
        }
        dead
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerEntry> {
        self.workers.get(worker_id)
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.workers.contains_key(worker_id)
    }

    pub fn all_workers(&self) -> Vec<&WorkerEntry> {
        self.workers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker_timeout(&self) -> Duration {
        self.worker_timeout
    }
}

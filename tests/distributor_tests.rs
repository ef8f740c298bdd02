//! Distributor tests: one `run_once` pass at a time against an in-memory queue
//! and recording worker endpoints.


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use dispatch_lite::queue::{DurableQueue, MemoryQueue, QueueError};
use dispatch_lite::scheduler::distributor::PassOutcome;
use dispatch_lite::scheduler::{Distributor, Job, JobStatus, JobStore, WorkerRegistry};
use test_harness::{
    assert_eventually, spawn_recording_worker, test_coordinator_config, test_queue,
    unreachable_address, RecordingWorker,
};

struct Fixture {
    queue: Arc<MemoryQueue>,
    job_store: Arc<RwLock<JobStore>>,
    registry: Arc<RwLock<WorkerRegistry>>,
    distributor: Distributor,
    shutdown: CancellationToken,
}

impl Fixture {
    fn new() -> Self {
        Self::with_store(JobStore::new())
    }

    fn with_store(store: JobStore) -> Self {
        let config = test_coordinator_config();
        let queue = test_queue();
        let job_store = Arc::new(RwLock::new(store));
        let registry = Arc::new(RwLock::new(WorkerRegistry::new(config.worker_timeout)));
        let distributor = Distributor::new(
            &config,
            queue.clone(),
            job_store.clone(),
            registry.clone(),
        );
        Self {
            queue,
            job_store,
            registry,
            distributor,
            shutdown: CancellationToken::new(),
        }
    }

    /// Store and enqueue a job the way a submission does.
    async fn submit(&self, command: &str) -> Job {
        let job = Job::new(command.to_string());
        self.job_store.write().await.add_job(job.clone());
        self.queue.enqueue(&job).await.unwrap();
        job
    }

    async fn register(&self, worker_id: &str, address: &str) {
        self.registry
            .write()
            .await
            .record_heartbeat(worker_id, address);
    }

    async fn run_once(&self) -> PassOutcome {
        self.distributor.run_once(&self.shutdown).await
    }

    async fn status(&self, job: &Job) -> Option<JobStatus> {
        self.job_store.read().await.status(&job.id)
    }
}

#[tokio::test]
async fn test_idle_when_queue_empty() {
    let fx = Fixture::new();
    assert_eq!(fx.run_once().await, PassOutcome::Idle);
}

#[tokio::test]
async fn test_dispatch_to_live_worker() {
    let fx = Fixture::new();
    let worker = RecordingWorker::default();
    let (addr, _server) = spawn_recording_worker(worker.clone()).await;
    fx.register("worker-a", &addr.to_string()).await;

    let job = fx.submit("echo hello").await;

    assert_eq!(
        fx.run_once().await,
        PassOutcome::Dispatched {
            job_id: job.id,
            worker_id: "worker-a".to_string()
        }
    );

    let stored = fx.job_store.read().await.get(&job.id).cloned().unwrap();
    assert_eq!(stored.status, JobStatus::Dispatched);
    assert_eq!(stored.assigned_worker.as_deref(), Some("worker-a"));
    assert_eq!(stored.dispatch_attempts, 1);

    let received = worker.received.lock().await.clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].job_id, job.id.to_string());
    assert_eq!(received[0].command, "echo hello");

    assert_eq!(fx.queue.len().await.unwrap(), 0);
    assert_eq!(
        fx.registry.read().await.get("worker-a").unwrap().dispatched,
        1
    );
}

#[tokio::test]
async fn test_no_worker_requeues_job() {
    let fx = Fixture::new();
    let job = fx.submit("echo waiting").await;

    assert_eq!(fx.run_once().await, PassOutcome::NoWorker { job_id: job.id });

    assert_eq!(fx.status(&job).await, Some(JobStatus::Pending));
    let queued = fx.queue.snapshot().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, job.id);
}

#[tokio::test]
async fn test_unreachable_worker_requeues_job() {
    let fx = Fixture::new();
    fx.register("worker-dead", &unreachable_address().await)
        .await;
    let job = fx.submit("echo hello").await;

    assert_eq!(
        fx.run_once().await,
        PassOutcome::DispatchFailed {
            job_id: job.id,
            worker_id: "worker-dead".to_string()
        }
    );

    // Never marked dispatched; the queue copy is back
    let stored = fx.job_store.read().await.get(&job.id).cloned().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(stored.assigned_worker.is_none());
    assert_eq!(stored.dispatch_attempts, 1);
    assert_eq!(fx.queue.snapshot().await[0].id, job.id);
}

#[tokio::test]
async fn test_rejected_task_requeues_job() {
    let fx = Fixture::new();
    let worker = RecordingWorker {
        reject: true,
        ..Default::default()
    };
    let (addr, _server) = spawn_recording_worker(worker.clone()).await;
    fx.register("worker-a", &addr.to_string()).await;
    let job = fx.submit("echo hello").await;

    assert!(matches!(
        fx.run_once().await,
        PassOutcome::DispatchFailed { .. }
    ));
    assert_eq!(fx.status(&job).await, Some(JobStatus::Pending));
    assert_eq!(fx.queue.len().await.unwrap(), 1);
    assert_eq!(worker.job_ids().await, vec![job.id.to_string()]);
}

#[tokio::test]
async fn test_failed_dispatch_retried_on_live_worker() {
    let fx = Fixture::new();
    let live = RecordingWorker::default();
    let (addr, _server) = spawn_recording_worker(live.clone()).await;

    // Id order puts the dead worker first in the rotation
    fx.register("worker-a", &unreachable_address().await).await;
    fx.register("worker-b", &addr.to_string()).await;
    let job = fx.submit("echo retry").await;

    assert!(matches!(
        fx.run_once().await,
        PassOutcome::DispatchFailed { .. }
    ));
    assert_eq!(
        fx.run_once().await,
        PassOutcome::Dispatched {
            job_id: job.id,
            worker_id: "worker-b".to_string()
        }
    );

    let stored = fx.job_store.read().await.get(&job.id).cloned().unwrap();
    assert_eq!(stored.status, JobStatus::Dispatched);
    assert_eq!(stored.dispatch_attempts, 2);
    assert_eq!(live.job_ids().await, vec![job.id.to_string()]);
}

#[tokio::test]
async fn test_round_robin_across_workers() {
    let fx = Fixture::new();
    let worker_a = RecordingWorker::default();
    let worker_b = RecordingWorker::default();
    let (addr_a, _a) = spawn_recording_worker(worker_a.clone()).await;
    let (addr_b, _b) = spawn_recording_worker(worker_b.clone()).await;
    fx.register("worker-a", &addr_a.to_string()).await;
    fx.register("worker-b", &addr_b.to_string()).await;

    for i in 0..4 {
        fx.submit(&format!("echo {}", i)).await;
    }
    for _ in 0..4 {
        assert!(matches!(
            fx.run_once().await,
            PassOutcome::Dispatched { .. }
        ));
    }

    assert_eq!(worker_a.job_ids().await.len(), 2);
    assert_eq!(worker_b.job_ids().await.len(), 2);
}

#[tokio::test]
async fn test_malformed_record_dropped() {
    let fx = Fixture::new();
    fx.queue.push_raw("{not a job").await;
    let job = fx.submit("echo after").await;

    assert_eq!(fx.run_once().await, PassOutcome::Malformed);
    // The next record is still served
    assert_eq!(fx.run_once().await, PassOutcome::NoWorker { job_id: job.id });
    assert_eq!(fx.queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_stale_queue_copy_skipped() {
    let fx = Fixture::new();
    let worker = RecordingWorker::default();
    let (addr, _server) = spawn_recording_worker(worker.clone()).await;
    fx.register("worker-a", &addr.to_string()).await;

    let job = fx.submit("echo once").await;
    fx.job_store
        .write()
        .await
        .complete(&job.id, "worker-a", true, "once\n".to_string());

    assert_eq!(fx.run_once().await, PassOutcome::Skipped { job_id: job.id });
    assert!(worker.job_ids().await.is_empty());
    assert_eq!(fx.status(&job).await, Some(JobStatus::Succeeded));
}

#[tokio::test]
async fn test_unknown_queued_job_adopted() {
    let fx = Fixture::new();
    let worker = RecordingWorker::default();
    let (addr, _server) = spawn_recording_worker(worker.clone()).await;
    fx.register("worker-a", &addr.to_string()).await;

    // Left on the queue by a previous coordinator
    let job = Job::new("echo leftover".to_string());
    fx.queue.enqueue(&job).await.unwrap();

    assert!(matches!(
        fx.run_once().await,
        PassOutcome::Dispatched { .. }
    ));
    assert_eq!(fx.status(&job).await, Some(JobStatus::Dispatched));
    assert_eq!(worker.job_ids().await, vec![job.id.to_string()]);
}

#[tokio::test]
async fn test_adoption_deferred_when_store_full() {
    let fx = Fixture::with_store(JobStore::with_capacity(1));
    let worker = RecordingWorker::default();
    let (addr, _server) = spawn_recording_worker(worker.clone()).await;
    fx.register("worker-a", &addr.to_string()).await;

    let live = Job::new("echo live".to_string());
    fx.job_store.write().await.add_job(live.clone());
    let leftover = Job::new("echo leftover".to_string());
    fx.queue.enqueue(&leftover).await.unwrap();

    assert_eq!(
        fx.run_once().await,
        PassOutcome::Deferred {
            job_id: leftover.id
        }
    );
    assert_eq!(fx.status(&leftover).await, None);
    assert_eq!(fx.job_store.read().await.len(), 1);
    assert!(worker.job_ids().await.is_empty());
    assert_eq!(fx.queue.len().await.unwrap(), 1, "record goes back on the queue");

    // Once the live job finishes the record is adopted and dispatched
    fx.job_store
        .write()
        .await
        .complete(&live.id, "worker-a", true, String::new());
    assert!(matches!(
        fx.run_once().await,
        PassOutcome::Dispatched { .. }
    ));
    assert_eq!(fx.status(&leftover).await, Some(JobStatus::Dispatched));
}

#[tokio::test]
async fn test_queue_unavailable() {
    let fx = Fixture::new();
    fx.queue.set_available(false);
    assert_eq!(fx.run_once().await, PassOutcome::QueueError);
}

/// Serves one job, then refuses every write.
struct PopOnceQueue {
    job: Mutex<Option<Job>>,
}

#[async_trait]
impl DurableQueue for PopOnceQueue {
    async fn enqueue(&self, _job: &Job) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("connection reset".to_string()))
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        Ok(self.job.lock().await.take())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.job.lock().await.iter().count())
    }
}

#[tokio::test]
async fn test_requeue_aborted_on_shutdown() {
    let config = test_coordinator_config();
    let job = Job::new("echo stuck".to_string());
    let job_store = Arc::new(RwLock::new(JobStore::new()));
    job_store.write().await.add_job(job.clone());

    let queue = Arc::new(PopOnceQueue {
        job: Mutex::new(Some(job.clone())),
    });
    let registry = Arc::new(RwLock::new(WorkerRegistry::new(config.worker_timeout)));
    let distributor = Distributor::new(&config, queue, job_store.clone(), registry);

    let shutdown = CancellationToken::new();
    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    // Re-queue keeps failing until shutdown interrupts it
    let outcome = tokio::time::timeout(Duration::from_secs(2), distributor.run_once(&shutdown))
        .await
        .expect("re-queue should stop on shutdown");
    assert_eq!(outcome, PassOutcome::Aborted { job_id: job.id });
    assert_eq!(
        job_store.read().await.status(&job.id),
        Some(JobStatus::Pending)
    );
}

#[tokio::test]
async fn test_run_loop_dispatches_after_worker_appears() {
    let fx = Fixture::new();
    let job = fx.submit("echo later").await;

    let Fixture {
        queue: _queue,
        job_store,
        registry,
        distributor,
        shutdown,
    } = fx;
    let handle = tokio::spawn(distributor.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(
        job_store.read().await.status(&job.id),
        Some(JobStatus::Pending)
    );

    let worker = RecordingWorker::default();
    let (addr, _server) = spawn_recording_worker(worker.clone()).await;
    registry
        .write()
        .await
        .record_heartbeat("worker-a", &addr.to_string());

    assert_eventually(
        || async { job_store.read().await.status(&job.id) == Some(JobStatus::Dispatched) },
        Duration::from_secs(3),
        "Job should be dispatched once a worker registers",
    )
    .await;
    assert_eq!(worker.job_ids().await, vec![job.id.to_string()]);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("distributor should stop on shutdown")
        .unwrap();
}

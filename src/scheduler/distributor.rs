use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::grpc::pool::WorkerClientPool;
use crate::queue::{DurableQueue, QueueError};
use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::registry::WorkerRegistry;
use crate::scheduler::store::{Adoption, JobStore, Transition};

/// What a single distributor pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pop timed out with nothing to do
    Idle,
    /// A worker accepted the job
    Dispatched { job_id: Uuid, worker_id: String },
    /// No live worker; the job went back on the queue
    NoWorker { job_id: Uuid },
    /// The chosen worker could not be reached or refused; the job went back on the queue
    DispatchFailed { job_id: Uuid, worker_id: String },
    /// The queue copy was stale (job already dispatched or finished) and was dropped
    Skipped { job_id: Uuid },
    /// An unknown record could not be adopted because the store is full of live
    /// jobs; it went back on the queue
    Deferred { job_id: Uuid },
    /// The record could not be decoded and was dropped
    Malformed,
    /// The queue backend returned an error
    QueueError,
    /// Shutdown interrupted a re-queue that kept failing
    Aborted { job_id: Uuid },
}

enum Reconciled {
    Dispatch,
    Stale,
    NoRoom,
}

/// Moves jobs from the durable queue to workers.
///
/// A job is marked `dispatched` only after the worker acknowledged `StartTask`.
/// Every other outcome puts the queue copy back, so a job that is `pending` in
/// the store is always either on the queue or in this loop's hands.
pub struct Distributor {
    queue: Arc<dyn DurableQueue>,
    job_store: Arc<RwLock<JobStore>>,
    registry: Arc<RwLock<WorkerRegistry>>,
    pool: WorkerClientPool,
    no_worker_pause: Duration,
    dispatch_failure_pause: Duration,
    queue_retry_pause: Duration,
}

impl Distributor {
    pub fn new(
        config: &CoordinatorConfig,
        queue: Arc<dyn DurableQueue>,
        job_store: Arc<RwLock<JobStore>>,
        registry: Arc<RwLock<WorkerRegistry>>,
    ) -> Self {
        Self {
            queue,
            job_store,
            registry,
            pool: WorkerClientPool::new(config.dispatch_connect_timeout, config.dispatch_timeout),
            no_worker_pause: config.no_worker_pause,
            dispatch_failure_pause: config.dispatch_failure_pause,
            queue_retry_pause: config.queue_retry_pause,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Distributor started, waiting for jobs");

        // The pop itself is bounded by the queue's pop timeout and is not raced
        // against shutdown: dropping a Redis BLPOP mid-flight could lose a record.
        while !shutdown.is_cancelled() {
            let pause = match self.run_once(&shutdown).await {
                PassOutcome::NoWorker { .. } => Some(self.no_worker_pause),
                PassOutcome::DispatchFailed { .. } => Some(self.dispatch_failure_pause),
                PassOutcome::QueueError | PassOutcome::Deferred { .. } => {
                    Some(self.queue_retry_pause)
                }
                _ => None,
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!("Distributor stopped");
    }

    /// Dequeue at most one job and try to hand it to a worker.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> PassOutcome {
        let job = match self.queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => return PassOutcome::Idle,
            Err(QueueError::Decode { record, source }) => {
                tracing::error!(record = %record, error = %source, "Dropping malformed job record");
                return PassOutcome::Malformed;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to dequeue job, retrying");
                return PassOutcome::QueueError;
            }
        };
        let job_id = job.id;

        match self.reconcile(&job).await {
            Reconciled::Dispatch => {}
            Reconciled::Stale => return PassOutcome::Skipped { job_id },
            Reconciled::NoRoom => {
                return if self.requeue(&job, shutdown).await {
                    PassOutcome::Deferred { job_id }
                } else {
                    PassOutcome::Aborted { job_id }
                };
            }
        }

        let worker = self.registry.read().await.pick_worker();
        let Some(worker) = worker else {
            tracing::info!(job_id = %job_id, "No available workers, re-queueing job");
            return if self.requeue(&job, shutdown).await {
                PassOutcome::NoWorker { job_id }
            } else {
                PassOutcome::Aborted { job_id }
            };
        };

        tracing::debug!(job_id = %job_id, worker_id = %worker.id, address = %worker.address, "Dispatching job");
        self.job_store.write().await.record_attempt(&job_id);

        match self.pool.start_task(&worker.address, &job).await {
            Ok(reply) => {
                let transition = self
                    .job_store
                    .write()
                    .await
                    .mark_dispatched(&job_id, &worker.id);
                match transition {
                    Transition::Applied => {
                        tracing::info!(job_id = %job_id, worker_id = %worker.id, reply = %reply, "Job dispatched");
                    }
                    Transition::Rejected(status) => {
                        // The worker's completion report got here first
                        tracing::debug!(job_id = %job_id, status = %status, "Job already past dispatch");
                    }
                    Transition::Unknown => {
                        tracing::warn!(job_id = %job_id, "Dispatched job missing from store");
                    }
                }
                self.registry.write().await.record_dispatch(&worker.id);
                PassOutcome::Dispatched {
                    job_id,
                    worker_id: worker.id,
                }
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    worker_id = %worker.id,
                    error = %e,
                    "Dispatch failed, re-queueing job"
                );
                self.pool.invalidate(&worker.address).await;
                if self.requeue(&job, shutdown).await {
                    PassOutcome::DispatchFailed {
                        job_id,
                        worker_id: worker.id,
                    }
                } else {
                    PassOutcome::Aborted { job_id }
                }
            }
        }
    }

    /// Check the dequeued copy against the store.
    async fn reconcile(&self, job: &Job) -> Reconciled {
        let mut store = self.job_store.write().await;
        match store.status(&job.id) {
            Some(JobStatus::Pending) => Reconciled::Dispatch,
            Some(status) => {
                tracing::warn!(job_id = %job.id, status = %status, "Dropping stale queue copy");
                Reconciled::Stale
            }
            // Left on the durable queue by an earlier coordinator process
            None => match store.adopt(job.clone()) {
                Adoption::Adopted | Adoption::Known => {
                    tracing::info!(job_id = %job.id, "Adopted job found on queue");
                    Reconciled::Dispatch
                }
                Adoption::Full => {
                    tracing::warn!(
                        job_id = %job.id,
                        capacity = store.capacity(),
                        "Job store full, deferring adoption of queued job"
                    );
                    Reconciled::NoRoom
                }
            },
        }
    }

    /// Put the job back on the queue, retrying until it sticks or shutdown.
    async fn requeue(&self, job: &Job, shutdown: &CancellationToken) -> bool {
        loop {
            match self.queue.enqueue(job).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to re-queue job, retrying");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::error!(job_id = %job.id, "Shutdown while re-queueing, job is only in memory");
                    return false;
                }
                _ = tokio::time::sleep(self.queue_retry_pause) => {}
            }
        }
    }
}

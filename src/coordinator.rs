use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::grpc::server::bind;
use crate::grpc::CoordinatorServer;
use crate::http::run_http;
use crate::queue::{self, DurableQueue};
use crate::scheduler::{
    Distributor, HealthMonitor, Job, JobStore, NewJob, Transition, WorkerRegistry,
};

/// Shared handles used by the RPC service, the HTTP API and the background loops.
///
/// The store and the registry each sit behind their own lock; no method here
/// holds both at once.
#[derive(Clone)]
pub struct CoordinatorState {
    pub queue: Arc<dyn DurableQueue>,
    pub job_store: Arc<RwLock<JobStore>>,
    pub registry: Arc<RwLock<WorkerRegistry>>,
}

impl CoordinatorState {
    pub fn new(config: &CoordinatorConfig, queue: Arc<dyn DurableQueue>) -> Self {
        Self {
            queue,
            job_store: Arc::new(RwLock::new(JobStore::with_capacity(config.max_jobs))),
            registry: Arc::new(RwLock::new(WorkerRegistry::new(config.worker_timeout))),
        }
    }

    /// Accept a submission: store it as `pending`, then persist the queue copy.
    ///
    /// If the enqueue fails the job is removed again and the error returned, so a
    /// job never exists only in memory.
    pub async fn add_job(&self, request: NewJob) -> Result<Job> {
        if request.command.trim().is_empty() {
            return Err(CoordinatorError::InvalidJob(
                "Command cannot be empty".to_string(),
            ));
        }

        let job = Job::from_request(request);
        let job_id = job.id;

        {
            let mut store = self.job_store.write().await;
            if !store.add_job(job.clone()) {
                return Err(CoordinatorError::StoreFull(store.capacity()));
            }
        }

        if let Err(e) = self.queue.enqueue(&job).await {
            self.job_store.write().await.remove(&job_id);
            tracing::error!(job_id = %job_id, error = %e, "Failed to enqueue job");
            return Err(e.into());
        }

        tracing::info!(job_id = %job_id, command = %job.command, "Job submitted");
        Ok(job)
    }

    /// Refresh (or lazily create) a worker's registry entry.
    pub async fn record_heartbeat(&self, worker_id: &str, address: &str) {
        let created = self
            .registry
            .write()
            .await
            .record_heartbeat(worker_id, address);
        if !created {
            tracing::trace!(worker_id, "Heartbeat");
        }
    }

    /// Apply a worker's completion report. Unknown or malformed ids and replays
    /// for finished jobs are tolerated.
    pub async fn report_completion(
        &self,
        job_id: &str,
        worker_id: &str,
        success: bool,
        result: String,
    ) -> Transition {
        let Ok(id) = Uuid::parse_str(job_id) else {
            tracing::warn!(job_id, worker_id, "Completion report for malformed job id");
            return Transition::Unknown;
        };

        let transition = self
            .job_store
            .write()
            .await
            .complete(&id, worker_id, success, result);

        match transition {
            Transition::Applied => {
                tracing::info!(job_id = %id, worker_id, success, "Job completed");
            }
            Transition::Unknown => {
                tracing::warn!(job_id = %id, worker_id, "Completion report for unknown job");
            }
            Transition::Rejected(status) => {
                tracing::info!(job_id = %id, worker_id, status = %status, "Ignoring repeated completion report");
            }
        }
        transition
    }

    pub async fn get_job(&self, job_id: &Uuid) -> Option<Job> {
        self.job_store.read().await.get(job_id).cloned()
    }
}

/// The coordinator process: RPC service, HTTP API, health monitor and distributor.
pub struct Coordinator {
    pub config: CoordinatorConfig,
    pub state: CoordinatorState,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, queue: Arc<dyn DurableQueue>) -> Self {
        let state = CoordinatorState::new(&config, queue);
        Self { config, state }
    }

    /// Validate the config and connect the queue backend. An unreachable queue is
    /// fatal here; mid-run queue errors are retried by the distributor.
    pub async fn connect(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let queue = queue::connect(&config.queue).await?;
        Ok(Self::new(config, queue))
    }

    /// Bind the configured addresses and run until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot bind or the gRPC server fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let grpc_listener = bind(self.config.listen_addr).await?;
        let http_listener = match self.config.http_addr {
            Some(addr) => Some(bind(addr).await?),
            None => None,
        };
        self.serve(grpc_listener, http_listener, shutdown).await
    }

    /// Run every coordinator subsystem on already bound listeners.
    ///
    /// 1. Spawns the health monitor (evicts silent workers)
    /// 2. Spawns the distributor (drains the queue, dispatches to workers)
    /// 3. Spawns the HTTP submission API if a listener was given
    /// 4. Serves gRPC until shutdown, then waits for every spawned task to stop
    pub async fn serve(
        self,
        grpc_listener: TcpListener,
        http_listener: Option<TcpListener>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let monitor = HealthMonitor::new(self.state.registry.clone(), self.config.sweep_interval);
        let monitor_handle = tokio::spawn(monitor.run(shutdown.clone()));

        let distributor = Distributor::new(
            &self.config,
            self.state.queue.clone(),
            self.state.job_store.clone(),
            self.state.registry.clone(),
        );
        let distributor_handle = tokio::spawn(distributor.run(shutdown.clone()));

        let mut handles = vec![
            ("health monitor", monitor_handle),
            ("distributor", distributor_handle),
        ];
        if let Some(listener) = http_listener {
            let http_handle =
                tokio::spawn(run_http(listener, self.state.clone(), shutdown.clone()));
            handles.push(("http api", http_handle));
        }

        let served = CoordinatorServer::new(self.state.clone())
            .serve(grpc_listener, shutdown.clone())
            .await;

        // Stop the loops even if the server exited on its own
        shutdown.cancel();
        for (task, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(task, error = %e, "Coordinator task panicked");
            }
        }

        served
    }
}

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::Channel;
use tonic::Status;

use crate::proto::coordinator_service_client::CoordinatorServiceClient;
use crate::proto::{CompletionRequest, TaskResponse};
use crate::worker::executor::{ExecutionResult, JobExecutor};

/// Finished job ids remembered for duplicate detection.
const DEFAULT_FINISHED_WINDOW: usize = 1024;

/// Job ids this agent has taken on: every running one, plus a bounded window of
/// recently finished ones.
#[derive(Debug)]
struct SeenTasks {
    running: HashSet<String>,
    finished: VecDeque<String>,
    window: usize,
}

impl SeenTasks {
    fn new(window: usize) -> Self {
        Self {
            running: HashSet::new(),
            finished: VecDeque::new(),
            window,
        }
    }

    /// Returns false if the id is running or finished recently.
    fn insert(&mut self, job_id: &str) -> bool {
        if self.running.contains(job_id) || self.finished.iter().any(|id| id == job_id) {
            return false;
        }
        self.running.insert(job_id.to_string());
        true
    }

    fn finish(&mut self, job_id: &str) {
        if !self.running.remove(job_id) || self.window == 0 {
            return;
        }
        if self.finished.len() >= self.window {
            self.finished.pop_front();
        }
        self.finished.push_back(job_id.to_string());
    }

    fn len(&self) -> usize {
        self.running.len() + self.finished.len()
    }
}

/// Accepts tasks from the coordinator, runs them in the background and reports
/// the outcome.
///
/// The job id doubles as an idempotency token: a second `StartTask` for a job
/// this agent is running, or finished recently, is acknowledged without running
/// it again.
pub struct WorkerAgent {
    worker_id: String,
    coordinator: CoordinatorServiceClient<Channel>,
    executor: JobExecutor,
    seen: Mutex<SeenTasks>,
    completion_timeout: Duration,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl WorkerAgent {
    pub fn new(
        worker_id: String,
        coordinator: CoordinatorServiceClient<Channel>,
        completion_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            worker_id,
            coordinator,
            executor: JobExecutor::new(),
            seen: Mutex::new(SeenTasks::new(DEFAULT_FINISHED_WINDOW)),
            completion_timeout,
            tasks: TaskTracker::new(),
            shutdown,
        }
    }

    /// How many finished job ids to remember for duplicate detection.
    pub fn with_finished_window(mut self, window: usize) -> Self {
        self.seen = Mutex::new(SeenTasks::new(window));
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Accept a task and return at once; execution continues on a spawned task.
    pub async fn start_task(
        self: &Arc<Self>,
        job_id: String,
        command: String,
        timeout_secs: u64,
    ) -> TaskResponse {
        tracing::info!(worker_id = %self.worker_id, job_id = %job_id, command = %command, "Received task");

        if command.trim().is_empty() {
            return TaskResponse {
                accepted: false,
                message: format!("Task {} rejected: empty command", job_id),
            };
        }
        if self.shutdown.is_cancelled() {
            return TaskResponse {
                accepted: false,
                message: format!("Task {} rejected: worker shutting down", job_id),
            };
        }

        if !self.seen.lock().await.insert(&job_id) {
            tracing::info!(job_id = %job_id, "Duplicate task ignored");
            return TaskResponse {
                accepted: true,
                message: format!("Task {} already accepted", job_id),
            };
        }

        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        let message = format!("Task accepted {} for execution", job_id);

        let agent = Arc::clone(self);
        self.tasks.spawn(async move {
            agent.execute_and_report(job_id, command, timeout).await;
        });

        TaskResponse {
            accepted: true,
            message,
        }
    }

    async fn execute_and_report(
        &self,
        job_id: String,
        command: String,
        timeout: Option<Duration>,
    ) {
        let cancel = self.shutdown.child_token();

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.executor.execute(&job_id, &command, timeout) => Some(result),
        };

        match result {
            Some(result) => self.report(&result).await,
            None => tracing::warn!(job_id = %job_id, "Task abandoned on shutdown"),
        }
        self.seen.lock().await.finish(&job_id);
    }

    async fn report(&self, result: &ExecutionResult) {
        let job_id = &result.job_id;
        match self.report_completion(result).await {
            Ok(()) => tracing::info!(
                job_id = %job_id,
                success = result.success,
                "Reported completion"
            ),
            Err(status) => tracing::warn!(
                job_id = %job_id,
                error = %status,
                "Failed to report completion"
            ),
        }
    }

    /// Send one completion report. Not retried on failure.
    pub async fn report_completion(&self, result: &ExecutionResult) -> Result<(), Status> {
        let mut client = self.coordinator.clone();
        let request = CompletionRequest {
            job_id: result.job_id.clone(),
            worker_id: self.worker_id.clone(),
            success: result.success,
            result: result.report_text(),
        };

        tokio::time::timeout(self.completion_timeout, client.report_completion(request))
            .await
            .map_err(|_| Status::deadline_exceeded("completion report timed out"))??;
        Ok(())
    }

    /// Job ids held for duplicate detection, running and recently finished.
    pub async fn tracked_tasks(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Tasks currently executing or reporting.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Stop accepting tracked work and wait for what is running to finish.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

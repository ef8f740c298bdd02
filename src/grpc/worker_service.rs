use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::proto::worker_service_server::WorkerService;
use crate::proto::{TaskRequest, TaskResponse};
use crate::worker::WorkerAgent;

/// gRPC surface of a worker. The coordinator pushes tasks here.
pub struct WorkerServiceImpl {
    agent: Arc<WorkerAgent>,
}

impl WorkerServiceImpl {
    pub fn new(agent: Arc<WorkerAgent>) -> Self {
        Self { agent }
    }
}

#[tonic::async_trait]
impl WorkerService for WorkerServiceImpl {
    async fn start_task(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        let req = request.into_inner();
        let response = self
            .agent
            .start_task(req.job_id, req.command, req.timeout_secs)
            .await;
        Ok(Response::new(response))
    }
}

use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::coordinator::CoordinatorState;
use crate::error::CoordinatorError;
use crate::proto::coordinator_service_server::CoordinatorService;
use crate::proto::{
    CompletionRequest, CompletionResponse, GetJobStatusRequest, HeartbeatRequest,
    HeartbeatResponse, JobInfo, JobStatus as ProtoJobStatus, ListJobsRequest, ListJobsResponse,
    ListWorkersRequest, ListWorkersResponse, SubmitJobRequest, SubmitJobResponse, WorkerInfo,
};
use crate::scheduler::{Job, JobStatus, NewJob};

/// gRPC surface of the coordinator, used by workers and clients
pub struct CoordinatorServiceImpl {
    state: CoordinatorState,
}

impl CoordinatorServiceImpl {
    pub fn new(state: CoordinatorState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl CoordinatorService for CoordinatorServiceImpl {
    async fn report_heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();

        if req.worker_id.trim().is_empty() {
            return Err(Status::invalid_argument("worker_id cannot be empty"));
        }
        if req.address.trim().is_empty() {
            return Err(Status::invalid_argument("address cannot be empty"));
        }

        self.state
            .record_heartbeat(&req.worker_id, &req.address)
            .await;

        Ok(Response::new(HeartbeatResponse { acknowledged: true }))
    }

    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> Result<Response<SubmitJobResponse>, Status> {
        let req = request.into_inner();

        let job = self
            .state
            .add_job(NewJob {
                command: req.command,
                timeout_secs: req.timeout_secs,
                priority: req.priority,
            })
            .await?;

        Ok(Response::new(SubmitJobResponse {
            job_id: job.id.to_string(),
            success: true,
            created_at_ms: job.created_at.timestamp_millis(),
        }))
    }

    async fn report_completion(
        &self,
        request: Request<CompletionRequest>,
    ) -> Result<Response<CompletionResponse>, Status> {
        let req = request.into_inner();

        self.state
            .report_completion(&req.job_id, &req.worker_id, req.success, req.result)
            .await;

        Ok(Response::new(CompletionResponse { acknowledged: true }))
    }

    async fn get_job_status(
        &self,
        request: Request<GetJobStatusRequest>,
    ) -> Result<Response<JobInfo>, Status> {
        let req = request.into_inner();

        let job_id =
            Uuid::parse_str(&req.job_id).map_err(|_| Status::invalid_argument("Invalid job ID"))?;

        let job = self
            .state
            .get_job(&job_id)
            .await
            .ok_or(CoordinatorError::JobNotFound(req.job_id))?;

        Ok(Response::new(job_to_proto(&job)))
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let req = request.into_inner();

        let page_size = if req.page_size == 0 {
            100
        } else {
            req.page_size.min(1000)
        } as usize;

        // Offset-based paging: the token is the starting index
        let offset: usize = if req.page_token.is_empty() {
            0
        } else {
            req.page_token
                .parse()
                .map_err(|_| Status::invalid_argument("Invalid page token"))?
        };

        let store = self.state.job_store.read().await;
        let all_jobs = store.all_jobs();
        let total_count = all_jobs.len();

        let jobs: Vec<JobInfo> = all_jobs
            .into_iter()
            .skip(offset)
            .take(page_size)
            .map(job_to_proto)
            .collect();

        let next_offset = offset + jobs.len();
        let next_page_token = if next_offset < total_count {
            next_offset.to_string()
        } else {
            String::new()
        };

        Ok(Response::new(ListJobsResponse {
            jobs,
            next_page_token,
            total_count: total_count as u32,
        }))
    }

    async fn list_workers(
        &self,
        _request: Request<ListWorkersRequest>,
    ) -> Result<Response<ListWorkersResponse>, Status> {
        let registry = self.state.registry.read().await;
        let workers = registry
            .all_workers()
            .into_iter()
            .map(|w| WorkerInfo {
                worker_id: w.id.clone(),
                address: w.address.clone(),
                last_heartbeat_ms_ago: w.last_heartbeat.elapsed().as_millis() as u64,
                dispatched: w.dispatched,
            })
            .collect();

        Ok(Response::new(ListWorkersResponse { workers }))
    }
}

pub fn status_to_proto(status: JobStatus) -> ProtoJobStatus {
    match status {
        JobStatus::Pending => ProtoJobStatus::Pending,
        JobStatus::Dispatched => ProtoJobStatus::Dispatched,
        JobStatus::Succeeded => ProtoJobStatus::Succeeded,
        JobStatus::Failed => ProtoJobStatus::Failed,
    }
}

fn job_to_proto(job: &Job) -> JobInfo {
    JobInfo {
        job_id: job.id.to_string(),
        command: job.command.clone(),
        status: status_to_proto(job.status) as i32,
        assigned_worker: job.assigned_worker.clone().unwrap_or_default(),
        result: job.result.clone().unwrap_or_default(),
        priority: job.priority,
        timeout_secs: job.timeout_secs,
        created_at_ms: job.created_at.timestamp_millis(),
        completed_at_ms: job.completed_at.map(|dt| dt.timestamp_millis()),
    }
}

//! HTTP submission API.
//!
//! Translates JSON requests into coordinator calls; the coordinator does the work.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::coordinator::CoordinatorState;
use crate::error::CoordinatorError;
use crate::scheduler::{Job, NewJob};

#[derive(Serialize)]
struct SubmitJobResponse {
    job_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    command: String,
    status: String,
    priority: i32,
    timeout: u64,
    created_at: i64,
    assigned_worker: Option<String>,
    result: Option<String>,
    completed_at: Option<i64>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            command: job.command.clone(),
            status: job.status.to_string(),
            priority: job.priority,
            timeout: job.timeout_secs,
            created_at: job.created_at.timestamp(),
            assigned_worker: job.assigned_worker.clone(),
            result: job.result.clone(),
            completed_at: job.completed_at.map(|dt| dt.timestamp()),
        }
    }
}

#[derive(Serialize)]
struct WorkerResponse {
    id: String,
    address: String,
    last_heartbeat_ms_ago: u64,
    dispatched: u64,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Routes of the HTTP API, without a listener
pub fn router(state: CoordinatorState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/jobs", get(list_jobs_handler).post(submit_job_handler))
        .route("/api/v1/jobs/:id", get(get_job_handler))
        .route("/api/v1/workers", get(list_workers_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_http(listener: TcpListener, state: CoordinatorState, shutdown: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Starting HTTP API");
    }

    let app = router(state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "HTTP API server failed");
    }
}

async fn submit_job_handler(
    State(state): State<CoordinatorState>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.add_job(request).await {
        Ok(job) => (
            StatusCode::OK,
            Json(SubmitJobResponse {
                job_id: job.id.to_string(),
            }),
        )
            .into_response(),
        Err(e @ CoordinatorError::InvalidJob(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e @ (CoordinatorError::StoreFull(_) | CoordinatorError::Queue(_))) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn list_jobs_handler(State(state): State<CoordinatorState>) -> impl IntoResponse {
    let store = state.job_store.read().await;
    let jobs: Vec<JobResponse> = store.all_jobs().into_iter().map(JobResponse::from).collect();
    Json(jobs)
}

async fn get_job_handler(
    State(state): State<CoordinatorState>,
    Path(id): Path<String>,
) -> Response {
    let Ok(job_id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid job ID");
    };

    match state.get_job(&job_id).await {
        Some(job) => Json(JobResponse::from(&job)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Job not found"),
    }
}

async fn list_workers_handler(State(state): State<CoordinatorState>) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let workers: Vec<WorkerResponse> = registry
        .all_workers()
        .into_iter()
        .map(|w| WorkerResponse {
            id: w.id.clone(),
            address: w.address.clone(),
            last_heartbeat_ms_ago: w.last_heartbeat.elapsed().as_millis() as u64,
            dispatched: w.dispatched,
        })
        .collect();
    Json(workers)
}

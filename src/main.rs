use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use dispatch_lite::config::{CoordinatorConfig, QueueBackend, QueueConfig, WorkerConfig};
use dispatch_lite::coordinator::Coordinator;
use dispatch_lite::proto::coordinator_service_client::CoordinatorServiceClient;
use dispatch_lite::proto::{
    GetJobStatusRequest, JobInfo, JobStatus, ListJobsRequest, ListWorkersRequest,
    SubmitJobRequest,
};
use dispatch_lite::shutdown::install_shutdown_handler;
use dispatch_lite::worker::WorkerRuntime;

#[derive(Parser, Debug)]
#[command(name = "dispatch-lite")]
#[command(version)]
#[command(about = "A job coordinator that dispatches queued commands to workers over gRPC")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the coordinator (queue, registry, distributor, RPC and HTTP APIs)
    Coordinator(CoordinatorArgs),

    /// Run a worker that executes dispatched tasks
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Worker registry commands
    Workers {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkerCommands,
    },
}

// =============================================================================
// Coordinator Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CoordinatorArgs {
    /// Address for the gRPC service
    #[arg(long, default_value = "0.0.0.0:50051")]
    listen: SocketAddr,

    /// Address for the HTTP submission API (disabled if omitted)
    #[arg(long)]
    http: Option<SocketAddr>,

    /// Queue backend: a redis:// URL (credentials included) or "memory"
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    queue: String,

    /// Redis list key holding pending jobs
    #[arg(long, default_value = "task_queue")]
    queue_key: String,

    /// Seconds between health sweeps
    #[arg(long, default_value = "5")]
    sweep_interval_secs: u64,

    /// Seconds of silence after which a worker is evicted
    #[arg(long, default_value = "10")]
    worker_timeout_secs: u64,

    /// Milliseconds to wait after re-queueing a job for lack of workers
    #[arg(long, default_value = "2000")]
    no_worker_pause_ms: u64,

    /// Maximum number of jobs kept in the job store
    #[arg(long, default_value = "10000")]
    max_jobs: usize,
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Worker identity reported in heartbeats
    #[arg(long, default_value = "worker-1")]
    id: String,

    /// Address for the worker's task endpoint
    #[arg(long, default_value = "127.0.0.1:50052")]
    listen: SocketAddr,

    /// host:port the coordinator should dial (defaults to --listen; required
    /// when --listen is 0.0.0.0 or [::])
    #[arg(long)]
    advertise: Option<String>,

    /// Coordinator gRPC address
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    coordinator: String,

    /// Seconds between heartbeats
    #[arg(long, default_value = "3")]
    heartbeat_interval_secs: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a new job
    Submit {
        /// The command to execute (e.g., "echo hello")
        command: String,

        /// Execution time limit in seconds (0 = none)
        #[arg(long, default_value = "0")]
        timeout: u64,

        /// Stored with the job; scheduling is FIFO regardless
        #[arg(long, default_value = "0")]
        priority: i32,
    },
    /// Get status of a specific job
    Status {
        /// The job ID (UUID)
        job_id: String,
    },
    /// List jobs
    List {
        /// Number of jobs per page (default: 100, max: 1000)
        #[arg(long, default_value = "100")]
        page_size: u32,

        /// Fetch all pages automatically
        #[arg(long)]
        all: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// List registered workers
    List,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_id: String,
    created_at_ms: i64,
}

#[derive(Serialize)]
struct JobOutput {
    job_id: String,
    command: String,
    status: String,
    assigned_worker: String,
    result: String,
    created_at_ms: i64,
    completed_at_ms: Option<i64>,
}

impl From<JobInfo> for JobOutput {
    fn from(job: JobInfo) -> Self {
        Self {
            status: job_status_to_string(job.status),
            job_id: job.job_id,
            command: job.command,
            assigned_worker: job.assigned_worker,
            result: job.result,
            created_at_ms: job.created_at_ms,
            completed_at_ms: job.completed_at_ms,
        }
    }
}

#[derive(Serialize)]
struct WorkerOutput {
    worker_id: String,
    address: String,
    last_heartbeat_ms_ago: u64,
    dispatched: u64,
}

fn job_status_to_string(status: i32) -> String {
    match JobStatus::try_from(status) {
        Ok(JobStatus::Pending) => "PENDING".to_string(),
        Ok(JobStatus::Dispatched) => "DISPATCHED".to_string(),
        Ok(JobStatus::Succeeded) => "SUCCEEDED".to_string(),
        Ok(JobStatus::Failed) => "FAILED".to_string(),
        _ => "UNKNOWN".to_string(),
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

// =============================================================================
// Process Entry Points
// =============================================================================

async fn run_coordinator(args: CoordinatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = CoordinatorConfig {
        listen_addr: args.listen,
        http_addr: args.http,
        queue: QueueConfig {
            backend: QueueBackend::parse(&args.queue)?,
            key: args.queue_key,
            ..QueueConfig::default()
        },
        sweep_interval: Duration::from_secs(args.sweep_interval_secs),
        worker_timeout: Duration::from_secs(args.worker_timeout_secs),
        no_worker_pause: Duration::from_millis(args.no_worker_pause_ms),
        max_jobs: args.max_jobs,
        ..CoordinatorConfig::default()
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        http_addr = ?config.http_addr,
        queue = ?config.queue.backend,
        sweep_interval = ?config.sweep_interval,
        worker_timeout = ?config.worker_timeout,
        "Starting coordinator"
    );

    let shutdown = install_shutdown_handler()?;
    let coordinator = Coordinator::connect(config).await?;
    coordinator.run(shutdown).await?;

    tracing::info!("Coordinator stopped");
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = WorkerConfig {
        worker_id: args.id,
        listen_addr: args.listen,
        advertise_addr: args.advertise,
        coordinator_addr: args.coordinator,
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
        ..WorkerConfig::default()
    };

    let shutdown = install_shutdown_handler()?;
    let runtime = WorkerRuntime::new(config, shutdown)?;
    runtime.run().await?;

    tracing::info!("Worker stopped");
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    client: &mut CoordinatorServiceClient<Channel>,
    request: SubmitJobRequest,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match client.submit_job(request).await {
        Ok(response) => {
            let resp = response.into_inner();
            match output_format {
                OutputFormat::Json => {
                    let output = JobSubmitOutput {
                        job_id: resp.job_id,
                        created_at_ms: resp.created_at_ms,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Table => {
                    println!("Job submitted successfully!");
                    println!("Job ID: {}", resp.job_id);
                }
            }
            Ok(())
        }
        Err(status) => {
            eprintln!("Error: Job submission failed: {}", status.message());
            std::process::exit(1);
        }
    }
}

async fn handle_job_status(
    client: &mut CoordinatorServiceClient<Channel>,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = client
        .get_job_status(GetJobStatusRequest { job_id })
        .await?
        .into_inner();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&JobOutput::from(job))?);
        }
        OutputFormat::Table => {
            println!("Job ID:          {}", job.job_id);
            println!("Command:         {}", job.command);
            println!("Status:          {}", job_status_to_string(job.status));
            if !job.assigned_worker.is_empty() {
                println!("Assigned Worker: {}", job.assigned_worker);
            }
            if !job.result.is_empty() {
                println!("Result:");
                for line in job.result.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

async fn handle_job_list(
    client: &mut CoordinatorServiceClient<Channel>,
    page_size: u32,
    all: bool,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut jobs: Vec<JobOutput> = Vec::new();
    let mut page_token = String::new();
    let mut total_count;
    let mut has_more;

    loop {
        let response = client
            .list_jobs(ListJobsRequest {
                page_size,
                page_token: page_token.clone(),
            })
            .await?
            .into_inner();

        total_count = response.total_count;
        jobs.extend(response.jobs.into_iter().map(JobOutput::from));
        has_more = !response.next_page_token.is_empty();

        if !has_more || !all {
            break;
        }
        page_token = response.next_page_token;
    }

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!("{:<38} {:<12} {:<14} COMMAND", "JOB ID", "STATUS", "WORKER");
            println!("{}", "-".repeat(84));
            for job in &jobs {
                let worker = if job.assigned_worker.is_empty() {
                    "-"
                } else {
                    job.assigned_worker.as_str()
                };
                // Truncate command if too long
                let cmd_display = if job.command.chars().count() > 20 {
                    format!("{}...", job.command.chars().take(17).collect::<String>())
                } else {
                    job.command.clone()
                };
                println!(
                    "{:<38} {:<12} {:<14} {}",
                    job.job_id, job.status, worker, cmd_display
                );
            }
            println!();
            println!("Showing {} of {} jobs", jobs.len(), total_count);
            if has_more {
                println!("(Use --all to fetch all pages)");
            }
        }
    }
    Ok(())
}

async fn handle_worker_list(
    client: &mut CoordinatorServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .list_workers(ListWorkersRequest {})
        .await?
        .into_inner();

    let workers: Vec<WorkerOutput> = response
        .workers
        .into_iter()
        .map(|w| WorkerOutput {
            worker_id: w.worker_id,
            address: w.address,
            last_heartbeat_ms_ago: w.last_heartbeat_ms_ago,
            dispatched: w.dispatched,
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&workers)?);
        }
        OutputFormat::Table => {
            if workers.is_empty() {
                println!("No workers registered.");
                return Ok(());
            }
            println!(
                "{:<20} {:<25} {:<16} DISPATCHED",
                "WORKER", "ADDRESS", "LAST SEEN (ms)"
            );
            println!("{}", "-".repeat(75));
            for w in &workers {
                println!(
                    "{:<20} {:<25} {:<16} {}",
                    w.worker_id, w.address, w.last_heartbeat_ms_ago, w.dispatched
                );
            }
        }
    }
    Ok(())
}

async fn connect_client(
    args: &ClientArgs,
) -> Result<CoordinatorServiceClient<Channel>, Box<dyn std::error::Error>> {
    let channel = Channel::from_shared(args.addr.clone())?.connect().await?;
    Ok(CoordinatorServiceClient::new(channel))
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Coordinator(coordinator_args) => {
            run_coordinator(coordinator_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Job { client, command } => {
            let mut grpc_client = connect_client(&client).await?;

            match command {
                JobCommands::Submit {
                    command,
                    timeout,
                    priority,
                } => {
                    let request = SubmitJobRequest {
                        command,
                        timeout_secs: timeout,
                        priority,
                    };
                    handle_job_submit(&mut grpc_client, request, &client.output).await?;
                }
                JobCommands::Status { job_id } => {
                    handle_job_status(&mut grpc_client, job_id, &client.output).await?;
                }
                JobCommands::List { page_size, all } => {
                    handle_job_list(&mut grpc_client, page_size, all, &client.output).await?;
                }
            }
        }
        Commands::Workers { client, command } => {
            let mut grpc_client = connect_client(&client).await?;

            match command {
                WorkerCommands::List => {
                    handle_worker_list(&mut grpc_client, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}

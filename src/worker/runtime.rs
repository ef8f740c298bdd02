use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::grpc::server::bind;
use crate::grpc::WorkerServer;
use crate::proto::coordinator_service_client::CoordinatorServiceClient;
use crate::worker::agent::WorkerAgent;
use crate::worker::heartbeat::HeartbeatSender;

/// A worker process: task endpoint, heartbeat loop and the agent behind them.
pub struct WorkerRuntime {
    pub config: WorkerConfig,
    pub agent: Arc<WorkerAgent>,
    shutdown: CancellationToken,
    client: CoordinatorServiceClient<tonic::transport::Channel>,
}

impl WorkerRuntime {
    /// Build the coordinator client without connecting; the first heartbeat
    /// dials, so a worker can start before the coordinator is up.
    pub fn new(config: WorkerConfig, shutdown: CancellationToken) -> Result<Self> {
        config.validate()?;

        let channel = Endpoint::from_shared(config.coordinator_addr.clone())?
            .connect_timeout(config.heartbeat_timeout)
            .connect_lazy();
        let client = CoordinatorServiceClient::new(channel);

        let agent = Arc::new(WorkerAgent::new(
            config.worker_id.clone(),
            client.clone(),
            config.completion_timeout,
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            agent,
            shutdown,
            client,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve tasks on `listener` and heartbeat until shutdown, then wait for
    /// in-flight tasks to wind down.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let mut config = self.config;
        if config.advertise_addr.is_none() {
            // Port 0 binds resolve to a real port only once bound
            if let Ok(local) = listener.local_addr() {
                config.advertise_addr = Some(local.to_string());
            }
        }

        let heartbeat = HeartbeatSender::new(
            config.worker_id.clone(),
            config.advertised_address(),
            config.heartbeat_interval,
            config.heartbeat_timeout,
            self.client,
        );
        let heartbeat_handle = tokio::spawn(heartbeat.run(self.shutdown.clone()));

        tracing::info!(
            worker_id = %config.worker_id,
            coordinator = %config.coordinator_addr,
            advertise = %config.advertised_address(),
            "Starting worker"
        );

        let served = WorkerServer::new(self.agent.clone())
            .serve(listener, self.shutdown.clone())
            .await;

        self.shutdown.cancel();
        if let Err(e) = heartbeat_handle.await {
            tracing::error!(error = %e, "Heartbeat task panicked");
        }
        self.agent.wait_idle().await;

        served
    }
}

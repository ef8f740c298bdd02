use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Status;

use crate::proto::coordinator_service_client::CoordinatorServiceClient;
use crate::proto::HeartbeatRequest;

/// Periodically reports this worker as alive to the coordinator
pub struct HeartbeatSender {
    worker_id: String,
    address: String,
    interval: Duration,
    rpc_timeout: Duration,
    client: CoordinatorServiceClient<Channel>,
}

impl HeartbeatSender {
    pub fn new(
        worker_id: String,
        address: String,
        interval: Duration,
        rpc_timeout: Duration,
        client: CoordinatorServiceClient<Channel>,
    ) -> Self {
        Self {
            worker_id,
            address,
            interval,
            rpc_timeout,
            client,
        }
    }

    /// Send a single heartbeat.
    pub async fn send_once(&self) -> Result<(), Status> {
        let mut client = self.client.clone();
        let request = HeartbeatRequest {
            worker_id: self.worker_id.clone(),
            timestamp: Utc::now().timestamp(),
            address: self.address.clone(),
        };

        tokio::time::timeout(self.rpc_timeout, client.report_heartbeat(request))
            .await
            .map_err(|_| Status::deadline_exceeded("heartbeat timed out"))??;
        Ok(())
    }

    /// Send heartbeats until `shutdown` fires. The first one goes out immediately.
    /// Failures are logged and the next tick tries again.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(worker_id = %self.worker_id, interval = ?self.interval, "Heartbeat loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.send_once().await {
                        Ok(()) => tracing::debug!(worker_id = %self.worker_id, "Heartbeat sent"),
                        Err(status) => tracing::warn!(
                            worker_id = %self.worker_id,
                            error = %status,
                            "Failed to send heartbeat"
                        ),
                    }
                }
            }
        }
        tracing::info!(worker_id = %self.worker_id, "Heartbeat loop stopped");
    }
}

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use crate::proto::worker_service_client::WorkerServiceClient;
use crate::proto::TaskRequest;
use crate::scheduler::Job;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid worker address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to connect to worker at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("StartTask failed: {0}")]
    Rpc(#[from] Status),

    #[error("StartTask timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker rejected task: {0}")]
    Rejected(String),
}

/// Cached gRPC clients for worker task endpoints, keyed by address.
pub struct WorkerClientPool {
    clients: Mutex<HashMap<String, WorkerServiceClient<Channel>>>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl WorkerClientPool {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            connect_timeout,
            request_timeout,
        }
    }

    async fn create_channel(&self, address: &str) -> Result<Channel, DispatchError> {
        let uri = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|source| DispatchError::InvalidAddress {
                address: address.to_string(),
                source,
            })?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);

        endpoint
            .connect()
            .await
            .map_err(|source| DispatchError::Connect {
                address: address.to_string(),
                source,
            })
    }

    /// Get or create a cached connection to a worker
    async fn get_client(
        &self,
        address: &str,
    ) -> Result<WorkerServiceClient<Channel>, DispatchError> {
        let mut pool = self.clients.lock().await;

        if let Some(client) = pool.get(address) {
            return Ok(client.clone());
        }

        let channel = self.create_channel(address).await?;
        let client = WorkerServiceClient::new(channel);

        pool.insert(address.to_string(), client.clone());
        Ok(client)
    }

    /// Drop a cached connection so the next dispatch reconnects.
    pub async fn invalidate(&self, address: &str) {
        self.clients.lock().await.remove(address);
    }

    /// Send `StartTask` for `job`. Returns the worker's message when it accepted.
    pub async fn start_task(&self, address: &str, job: &Job) -> Result<String, DispatchError> {
        let mut client = self.get_client(address).await?;

        let request = TaskRequest {
            job_id: job.id.to_string(),
            command: job.command.clone(),
            timeout_secs: job.timeout_secs,
        };

        let response = tokio::time::timeout(self.request_timeout, client.start_task(request))
            .await
            .map_err(|_| DispatchError::Timeout(self.request_timeout))??
            .into_inner();

        if response.accepted {
            Ok(response.message)
        } else {
            Err(DispatchError::Rejected(response.message))
        }
    }
}

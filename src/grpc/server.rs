use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::coordinator::CoordinatorState;
use crate::error::{CoordinatorError, Result};
use crate::grpc::coordinator_service::CoordinatorServiceImpl;
use crate::grpc::worker_service::WorkerServiceImpl;
use crate::proto::coordinator_service_server::CoordinatorServiceServer;
use crate::proto::worker_service_server::WorkerServiceServer;
use crate::worker::WorkerAgent;

pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| CoordinatorError::Bind { addr, source })
}

pub struct CoordinatorServer {
    state: CoordinatorState,
}

impl CoordinatorServer {
    pub fn new(state: CoordinatorState) -> Self {
        Self { state }
    }

    pub async fn run(self, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        let listener = bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let service = CoordinatorServiceImpl::new(self.state);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Starting coordinator gRPC server");
        }

        Server::builder()
            .add_service(CoordinatorServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await
            })
            .await?;
        Ok(())
    }
}

pub struct WorkerServer {
    agent: Arc<WorkerAgent>,
}

impl WorkerServer {
    pub fn new(agent: Arc<WorkerAgent>) -> Self {
        Self { agent }
    }

    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let service = WorkerServiceImpl::new(self.agent);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Starting worker gRPC server");
        }

        Server::builder()
            .add_service(WorkerServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await
            })
            .await?;
        Ok(())
    }
}

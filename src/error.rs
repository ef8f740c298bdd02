use thiserror::Error;
use tonic::Status;

use crate::config::ConfigError;
use crate::queue::QueueError;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job store is at capacity ({0} live jobs)")]
    StoreFull(usize),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl From<CoordinatorError> for Status {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::InvalidJob(msg) => Status::invalid_argument(msg),
            CoordinatorError::JobNotFound(_) => Status::not_found(err.to_string()),
            CoordinatorError::StoreFull(_) => Status::resource_exhausted(err.to_string()),
            CoordinatorError::Queue(QueueError::Encode(_)) => {
                Status::invalid_argument(err.to_string())
            }
            CoordinatorError::Queue(_) => Status::unavailable(err.to_string()),
            CoordinatorError::Config(_)
            | CoordinatorError::Bind { .. }
            | CoordinatorError::Transport(_) => Status::internal(err.to_string()),
        }
    }
}

pub mod coordinator_service;
pub mod pool;
pub mod server;
pub mod worker_service;

pub use pool::{DispatchError, WorkerClientPool};
pub use server::{CoordinatorServer, WorkerServer};

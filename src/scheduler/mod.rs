//! Coordinator-side bookkeeping and the dispatch loop.
//!
//! - [`JobStore`]: authoritative job records and their lifecycle status
//! - [`WorkerRegistry`]: workers known from heartbeats, with round-robin selection
//! - [`HealthMonitor`]: evicts workers that went silent
//! - [`Distributor`]: drains the durable queue and pushes jobs to workers

pub mod distributor;
pub mod job;
pub mod monitor;
pub mod registry;
pub mod store;

pub use distributor::Distributor;
pub use job::{Job, JobStatus, NewJob};
pub use monitor::HealthMonitor;
pub use registry::{WorkerEntry, WorkerRegistry};
pub use store::{Adoption, JobStore, Transition};

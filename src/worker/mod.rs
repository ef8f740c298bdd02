//! Worker side of the system.
//!
//! - [`WorkerAgent`]: accepts `StartTask`, runs the command on a background task
//!   and reports completion to the coordinator
//! - [`HeartbeatSender`]: keeps the worker registered with the coordinator
//! - [`JobExecutor`]: runs a command as a child process and captures its output
//! - [`WorkerRuntime`]: wires the above to a gRPC listener
//!
//! # Execution Flow
//!
//! 1. The coordinator calls `StartTask`; the agent replies at once
//! 2. [`JobExecutor::execute`] splits the command into program and arguments
//! 3. stdout and stderr are captured, the exit status decides success
//! 4. The agent sends `ReportCompletion` once, without retries

pub mod agent;
pub mod executor;
pub mod heartbeat;
pub mod runtime;

pub use agent::WorkerAgent;
pub use executor::{ExecutionResult, JobExecutor};
pub use heartbeat::HeartbeatSender;
pub use runtime::WorkerRuntime;

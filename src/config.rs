use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_QUEUE_KEY: &str = "task_queue";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker timeout ({timeout:?}) must exceed the sweep interval ({interval:?})")]
    TimeoutNotAboveInterval { timeout: Duration, interval: Duration },

    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),

    #[error("worker id cannot be empty")]
    EmptyWorkerId,

    #[error("worker listens on unspecified address {0}; set an advertise address the coordinator can dial")]
    UnroutableAdvertise(SocketAddr),

    #[error("unsupported queue backend: {0} (expected redis://... or memory)")]
    UnknownBackend(String),
}

/// Where pending jobs are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process FIFO. Pending jobs are lost when the coordinator exits.
    Memory,
    /// Redis list; `url` is a `redis://` connection string (credentials included).
    Redis { url: String },
}

impl QueueBackend {
    /// Parse a `--queue` argument: `memory` or a `redis://` / `rediss://` URL.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("memory") {
            Ok(QueueBackend::Memory)
        } else if value.starts_with("redis://") || value.starts_with("rediss://") {
            Ok(QueueBackend::Redis {
                url: value.to_string(),
            })
        } else {
            Err(ConfigError::UnknownBackend(value.to_string()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis list key holding serialized jobs
    pub key: String,
    /// Upper bound on a single blocking pop, so callers can observe cancellation
    pub pop_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            key: DEFAULT_QUEUE_KEY.to_string(),
            pop_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    /// HTTP submission API; disabled when `None`
    pub http_addr: Option<SocketAddr>,
    pub queue: QueueConfig,
    /// How often the health monitor sweeps the registry
    pub sweep_interval: Duration,
    /// Workers silent for longer than this are evicted
    pub worker_timeout: Duration,
    /// Pause after re-queueing a job because no worker was available
    pub no_worker_pause: Duration,
    /// Pause after a failed dispatch before the next dequeue
    pub dispatch_failure_pause: Duration,
    /// Pause after the queue backend reported an error
    pub queue_retry_pause: Duration,
    pub dispatch_connect_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub max_jobs: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:50051"
                .parse()
                .expect("default listen address is valid"),
            http_addr: None,
            queue: QueueConfig::default(),
            sweep_interval: Duration::from_secs(5),
            worker_timeout: Duration::from_secs(10),
            no_worker_pause: Duration::from_secs(2),
            dispatch_failure_pause: Duration::from_millis(500),
            queue_retry_pause: Duration::from_secs(1),
            dispatch_connect_timeout: Duration::from_secs(2),
            dispatch_timeout: Duration::from_secs(5),
            max_jobs: 10_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_http(mut self, addr: SocketAddr) -> Self {
        self.http_addr = Some(addr);
        self
    }

    pub fn with_queue(mut self, backend: QueueBackend) -> Self {
        self.queue.backend = backend;
        self
    }

    pub fn with_liveness(mut self, sweep_interval: Duration, worker_timeout: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self.worker_timeout = worker_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("sweep interval"));
        }
        if self.no_worker_pause.is_zero() {
            return Err(ConfigError::ZeroDuration("no-worker pause"));
        }
        if self.worker_timeout <= self.sweep_interval {
            return Err(ConfigError::TimeoutNotAboveInterval {
                timeout: self.worker_timeout,
                interval: self.sweep_interval,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub listen_addr: SocketAddr,
    /// Address the coordinator should dial; defaults to `listen_addr`
    pub advertise_addr: Option<String>,
    /// Coordinator gRPC endpoint, e.g. `http://127.0.0.1:50051`
    pub coordinator_addr: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub completion_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:50052"
                .parse()
                .expect("default worker address is valid"),
            advertise_addr: None,
            coordinator_addr: "http://127.0.0.1:50051".to_string(),
            heartbeat_interval: Duration::from_secs(3),
            heartbeat_timeout: Duration::from_secs(2),
            completion_timeout: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            worker_id: worker_id.into(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_coordinator(mut self, addr: impl Into<String>) -> Self {
        self.coordinator_addr = addr.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// The `host:port` reported in heartbeats.
    pub fn advertised_address(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.listen_addr.to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_id.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerId);
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat interval"));
        }
        if self.advertise_addr.is_none() && self.listen_addr.ip().is_unspecified() {
            return Err(ConfigError::UnroutableAdvertise(self.listen_addr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:50051");
        assert!(cfg.http_addr.is_none());
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.worker_timeout, Duration::from_secs(10));
        assert_eq!(cfg.no_worker_pause, Duration::from_secs(2));
        assert_eq!(cfg.queue.backend, QueueBackend::Memory);
        assert_eq!(cfg.queue.key, "task_queue");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn coordinator_config_rejects_timeout_not_above_interval() {
        let cfg = CoordinatorConfig::default()
            .with_liveness(Duration::from_secs(5), Duration::from_secs(5));
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::TimeoutNotAboveInterval {
                timeout: Duration::from_secs(5),
                interval: Duration::from_secs(5),
            })
        );
    }

    #[test]
    fn coordinator_config_rejects_zero_interval() {
        let cfg =
            CoordinatorConfig::default().with_liveness(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration("sweep interval"))
        );
    }

    #[test]
    fn coordinator_config_builders() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let http: SocketAddr = "10.0.0.1:8080".parse().unwrap();
        let cfg = CoordinatorConfig::new(addr)
            .with_http(http)
            .with_queue(QueueBackend::Redis {
                url: "redis://localhost:6379".to_string(),
            });
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.http_addr, Some(http));
        assert!(matches!(cfg.queue.backend, QueueBackend::Redis { .. }));
    }

    #[test]
    fn queue_backend_parse() {
        assert_eq!(QueueBackend::parse("memory"), Ok(QueueBackend::Memory));
        assert_eq!(QueueBackend::parse("MEMORY"), Ok(QueueBackend::Memory));
        assert_eq!(
            QueueBackend::parse("redis://:secret@localhost:6379/0"),
            Ok(QueueBackend::Redis {
                url: "redis://:secret@localhost:6379/0".to_string()
            })
        );
        assert!(matches!(
            QueueBackend::parse("kafka://broker"),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.worker_id, "worker-1");
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:50052");
        assert_eq!(cfg.coordinator_addr, "http://127.0.0.1:50051");
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(2));
        assert_eq!(cfg.completion_timeout, Duration::from_secs(5));
    }

    #[test]
    fn worker_config_advertised_address() {
        let mut cfg = WorkerConfig::new("w", "0.0.0.0:7000".parse().unwrap());
        assert_eq!(cfg.advertised_address(), "0.0.0.0:7000");
        cfg.advertise_addr = Some("worker.internal:7000".to_string());
        assert_eq!(cfg.advertised_address(), "worker.internal:7000");
    }

    #[test]
    fn worker_config_requires_advertise_on_wildcard_listen() {
        let mut cfg = WorkerConfig::new("w", "0.0.0.0:50052".parse().unwrap());
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::UnroutableAdvertise(
                "0.0.0.0:50052".parse().unwrap()
            ))
        );

        let v6 = WorkerConfig::new("w", "[::]:50052".parse().unwrap());
        assert!(matches!(
            v6.validate(),
            Err(ConfigError::UnroutableAdvertise(_))
        ));

        cfg.advertise_addr = Some("10.0.0.7:50052".to_string());
        assert!(cfg.validate().is_ok());
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn worker_config_rejects_blank_id() {
        let cfg = WorkerConfig::new("  ", "127.0.0.1:7000".parse().unwrap());
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyWorkerId));
    }
}

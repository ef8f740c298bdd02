use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::scheduler::registry::WorkerRegistry;

/// Periodically evicts workers that stopped heartbeating.
pub struct HealthMonitor {
    registry: Arc<RwLock<WorkerRegistry>>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<RwLock<WorkerRegistry>>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// One sweep. Returns the evicted worker ids.
    pub async fn sweep(&self) -> Vec<String> {
        let evicted = self.registry.write().await.evict_stale();
        for worker_id in &evicted {
            tracing::warn!(worker_id = %worker_id, "Worker timed out, removed from registry");
        }
        evicted
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately
        ticker.tick().await;

        tracing::info!(interval = ?self.interval, "Health monitor started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        tracing::info!("Health monitor stopped");
    }
}

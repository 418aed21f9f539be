// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::health::Probe;
use crate::metrics::MetricsCollector;
use crate::pool::ServerPool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

/// Periodic liveness sweep over every registered server.
///
/// Probes run sequentially within a tick; the worst case is bounded by
/// probe timeout times pool size, which the coarse interval absorbs.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<ServerPool>,
    probe: Arc<dyn Probe>,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<ServerPool>,
        probe: Arc<dyn Probe>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            pool,
            probe,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Run the sweep loop until `shutdown` is called.
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(interval = ?self.config.interval(), "starting health checker");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One probe pass over the pool. Public so tests can drive ticks directly.
    pub async fn sweep(&self) {
        debug!("starting health check sweep");

        let mut live = 0;
        for server in self.pool.servers() {
            let alive = self.probe.check(&server.target).await;
            if alive {
                live += 1;
                self.pool.mark_alive(server.uid).await;
            } else {
                self.pool.mark_dead(server.uid).await;
            }

            debug!(
                uid = server.uid,
                url = %server.target,
                status = if alive { "up" } else { "down" },
                "probed upstream"
            );

            if let Some(metrics) = &self.metrics {
                metrics.update_upstream_health(server.target.as_str(), alive);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_upstream_counts(live, self.pool.len());
        }

        info!(live, total = self.pool.len(), "health check sweep complete");
    }
}

// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Prometheus text exposition of everything registered.
    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %err, "failed to encode metrics");
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Upstream metrics
    pub upstream_forwards_total: IntCounterVec,
    pub upstream_health_status: IntGaugeVec,

    // Protocol metrics
    pub retries_total: IntCounter,
    pub failovers_total: IntCounter,

    // Pool metrics
    pub live_upstreams: IntGauge,
    pub total_upstreams: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of requests"),
            &["method", "status_code"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["method", "status_code"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let upstream_forwards_total = IntCounterVec::new(
            Opts::new("lb_upstream_forwards_total", "Forwards per upstream"),
            &["upstream", "outcome"],
        )?;
        registry.register(Box::new(upstream_forwards_total.clone()))?;

        let upstream_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_upstream_health_status",
                "Upstream health (1=alive, 0=dead)",
            ),
            &["upstream"],
        )?;
        registry.register(Box::new(upstream_health_status.clone()))?;

        let retries_total =
            IntCounter::new("lb_retries_total", "Total same-server retries")?;
        registry.register(Box::new(retries_total.clone()))?;

        let failovers_total =
            IntCounter::new("lb_failovers_total", "Total failovers to another upstream")?;
        registry.register(Box::new(failovers_total.clone()))?;

        let live_upstreams =
            IntGauge::new("lb_live_upstreams", "Number of live upstreams")?;
        registry.register(Box::new(live_upstreams.clone()))?;

        let total_upstreams =
            IntGauge::new("lb_total_upstreams", "Total number of upstreams")?;
        registry.register(Box::new(total_upstreams.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            upstream_forwards_total,
            upstream_health_status,
            retries_total,
            failovers_total,
            live_upstreams,
            total_upstreams,
        })
    }

    pub fn record_request(&self, method: &str, status_code: u16, duration: std::time::Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method, &status])
            .observe(duration.as_secs_f64());
    }

    pub fn record_forward(&self, upstream: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.upstream_forwards_total
            .with_label_values(&[upstream, outcome])
            .inc();
    }

    pub fn update_upstream_health(&self, upstream: &str, alive: bool) {
        let value = if alive { 1 } else { 0 };
        self.upstream_health_status
            .with_label_values(&[upstream])
            .set(value);
    }

    pub fn inc_retry(&self) {
        self.retries_total.inc();
    }

    pub fn inc_failover(&self) {
        self.failovers_total.inc();
    }

    pub fn update_upstream_counts(&self, live: usize, total: usize) {
        self.live_upstreams.set(live as i64);
        self.total_upstreams.set(total as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers_registered_metrics() {
        let registry = MetricsRegistry::new().unwrap();
        let collector = registry.collector();

        collector.record_request("GET", 200, std::time::Duration::from_millis(5));
        collector.record_forward("http://10.0.0.1:8080/", true);
        collector.inc_retry();
        collector.inc_failover();
        collector.update_upstream_counts(2, 3);

        let text = String::from_utf8(registry.gather()).unwrap();
        assert!(text.contains("lb_requests_total"));
        assert!(text.contains("lb_upstream_forwards_total"));
        assert!(text.contains("lb_retries_total 1"));
        assert!(text.contains("lb_failovers_total 1"));
        assert!(text.contains("lb_live_upstreams 2"));
        assert!(text.contains("lb_total_upstreams 3"));
    }
}

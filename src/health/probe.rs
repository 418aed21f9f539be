// src/health/probe.rs
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::warn;
use url::Url;

/// Transport-level reachability check. The checker only cares about the
/// boolean outcome; failures are the probe's to log.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, target: &Url) -> bool;
}

/// Reachability via a plain TCP connect with a fixed timeout.
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, target: &Url) -> bool {
        let host = match target.host_str() {
            Some(host) => host,
            None => {
                warn!(url = %target, "upstream url has no host, probe failed");
                return false;
            }
        };
        let port = target.port_or_known_default().unwrap_or(80);

        match timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(err)) => {
                warn!(url = %target, error = %err, "upstream unreachable");
                false
            }
            Err(_) => {
                warn!(url = %target, timeout = ?self.timeout, "probe timed out");
                false
            }
        }
    }
}

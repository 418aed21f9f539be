// src/dispatch/dispatcher.rs
use crate::config::RetryConfig;
use crate::dispatch::{ForwardError, Forwarder};
use crate::metrics::MetricsCollector;
use crate::pool::{Server, ServerPool};
use crate::scheduler::Scheduler;
use hyper::body::Bytes;
use hyper::http::request::Parts;
use hyper::{Body, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

/// Ceilings and backoff for the retry/failover protocol.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_retries: config.max_retries,
            backoff: config.backoff(),
        }
    }
}

/// Per-request attempt bookkeeping, threaded explicitly through the dispatch
/// loop. `attempts` counts full dispatch cycles (server selections);
/// `retries` counts repeated forwards to the current server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub attempts: u32,
    pub retries: u32,
}

impl AttemptState {
    pub fn new() -> Self {
        Self {
            attempts: 1,
            retries: 0,
        }
    }

    /// Another forward to the same server.
    pub fn retried(self) -> Self {
        Self {
            attempts: self.attempts,
            retries: self.retries + 1,
        }
    }

    /// Failover to a fresh server; the retry budget starts over.
    pub fn failed_over(self) -> Self {
        Self {
            attempts: self.attempts + 1,
            retries: 0,
        }
    }
}

impl Default for AttemptState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no live upstream available")]
    NoLiveUpstream,

    #[error("exhausted {0} dispatch attempts")]
    AttemptsExhausted(u32),

    #[error("failed to read request body: {0}")]
    Body(#[source] hyper::Error),
}

impl From<DispatchError> for Response<Body> {
    fn from(err: DispatchError) -> Self {
        let (status, message) = match err {
            DispatchError::NoLiveUpstream | DispatchError::AttemptsExhausted(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service not available")
            }
            DispatchError::Body(_) => (StatusCode::BAD_REQUEST, "Bad request"),
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = status;
        response
    }
}

/// Per-request entry point tying the scheduler, pool and forwarder together.
pub struct Dispatcher {
    pool: Arc<ServerPool>,
    scheduler: Arc<dyn Scheduler>,
    forwarder: Arc<dyn Forwarder>,
    policy: RetryPolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<ServerPool>,
        scheduler: Arc<dyn Scheduler>,
        forwarder: Arc<dyn Forwarder>,
        policy: RetryPolicy,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            pool,
            scheduler,
            forwarder,
            policy,
            metrics,
        }
    }

    /// Dispatch one inbound request. Exhaustion surfaces as an explicit 503;
    /// transport errors never reach the caller directly.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let request_id = Uuid::new_v4();
        let method = req.method().clone();
        let start = Instant::now();

        let response = match self.dispatch(request_id, req).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%request_id, error = %err, "request failed");
                Response::from(err)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_request(method.as_str(), response.status().as_u16(), start.elapsed());
        }
        response
    }

    async fn dispatch(
        &self,
        request_id: Uuid,
        req: Request<Body>,
    ) -> Result<Response<Body>, DispatchError> {
        let (parts, body) = req.into_parts();
        // Buffer the body once so every forward can send a fresh copy.
        let body = hyper::body::to_bytes(body)
            .await
            .map_err(DispatchError::Body)?;

        let mut state = AttemptState::new();
        loop {
            if state.attempts > self.policy.max_attempts {
                return Err(DispatchError::AttemptsExhausted(self.policy.max_attempts));
            }

            let server = match self.scheduler.schedule(&self.pool).await {
                Some(server) => server,
                None => return Err(DispatchError::NoLiveUpstream),
            };
            debug!(
                %request_id,
                uid = server.uid,
                upstream = %server.target,
                attempts = state.attempts,
                "selected upstream"
            );

            match self.forward_with_retries(request_id, &server, &parts, &body, &mut state).await {
                Some(response) => return Ok(response),
                None => {
                    // Retry budget exhausted on this server: kill it and
                    // fail over to the next live one.
                    self.pool.mark_dead(server.uid).await;
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_failover();
                    }
                    state = state.failed_over();
                }
            }
        }
    }

    /// Forward to one server, retrying on the spot with a fixed backoff.
    /// Returns `None` once the retry ceiling for this server is hit.
    async fn forward_with_retries(
        &self,
        request_id: Uuid,
        server: &Server,
        parts: &Parts,
        body: &Bytes,
        state: &mut AttemptState,
    ) -> Option<Response<Body>> {
        loop {
            let request = rebuild_request(parts, body);
            match self.forwarder.forward(&server.target, request).await {
                Ok(response) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_forward(server.target.as_str(), true);
                    }
                    return Some(response);
                }
                Err(err) => {
                    self.log_forward_error(request_id, server, state, &err);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_forward(server.target.as_str(), false);
                    }

                    if state.retries < self.policy.max_retries {
                        sleep(self.policy.backoff).await;
                        *state = state.retried();
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_retry();
                        }
                    } else {
                        return None;
                    }
                }
            }
        }
    }

    fn log_forward_error(
        &self,
        request_id: Uuid,
        server: &Server,
        state: &AttemptState,
        err: &ForwardError,
    ) {
        warn!(
            %request_id,
            uid = server.uid,
            upstream = %server.target,
            attempts = state.attempts,
            retries = state.retries,
            error = %err,
            "forward failed"
        );
    }
}

/// A fresh request from buffered parts. Infallible: method, uri and headers
/// came off a request hyper already accepted.
fn rebuild_request(parts: &Parts, body: &Bytes) -> Request<Body> {
    let mut request = Request::new(Body::from(body.clone()));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::scheduler::RoundRobin;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use url::Url;

    /// Forwarder with scripted failures per upstream host.
    struct FakeForwarder {
        always_fail: Mutex<HashSet<String>>,
        fail_first: Mutex<HashMap<String, u32>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeForwarder {
        fn new() -> Self {
            Self {
                always_fail: Mutex::new(HashSet::new()),
                fail_first: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn always_fail(&self, host: &str) {
            self.always_fail.lock().unwrap().insert(host.to_string());
        }

        fn fail_first(&self, host: &str, failures: u32) {
            self.fail_first
                .lock()
                .unwrap()
                .insert(host.to_string(), failures);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Forwarder for FakeForwarder {
        async fn forward(
            &self,
            target: &Url,
            req: Request<Body>,
        ) -> Result<Response<Body>, ForwardError> {
            let host = target.host_str().unwrap().to_string();
            self.calls.lock().unwrap().push(host.clone());

            if self.always_fail.lock().unwrap().contains(&host) {
                return Err(ForwardError::Unreachable("connection refused".into()));
            }
            if let Some(remaining) = self.fail_first.lock().unwrap().get_mut(&host) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ForwardError::Unreachable("connection refused".into()));
                }
            }

            let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("x-upstream", host)
                .body(Body::from(body))
                .unwrap())
        }
    }

    fn pool_of(hosts: &[&str]) -> Arc<ServerPool> {
        let configs: Vec<ServerConfig> = hosts
            .iter()
            .map(|h| ServerConfig {
                url: Url::parse(&format!("http://{}:8080", h)).unwrap(),
            })
            .collect();
        Arc::new(ServerPool::from_configs(&configs).unwrap())
    }

    fn dispatcher(pool: Arc<ServerPool>, forwarder: Arc<FakeForwarder>) -> Dispatcher {
        Dispatcher::new(
            pool,
            Arc::new(RoundRobin::new()),
            forwarder,
            RetryPolicy {
                max_attempts: 3,
                max_retries: 3,
                backoff: Duration::from_millis(0),
            },
            None,
        )
    }

    fn request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/test")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upstream_of(response: &Response<Body>) -> &str {
        response.headers()["x-upstream"].to_str().unwrap()
    }

    #[tokio::test]
    async fn relays_upstream_response() {
        let pool = pool_of(&["10.0.0.1", "10.0.0.2"]);
        let forwarder = Arc::new(FakeForwarder::new());
        let dispatcher = dispatcher(pool, forwarder.clone());

        let response = dispatcher.handle(request("ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        // Cursor increments before selecting, so the first pick is index 1.
        assert_eq!(upstream_of(&response), "10.0.0.2");
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"ping");
    }

    #[tokio::test]
    async fn retries_same_server_until_it_succeeds() {
        let pool = pool_of(&["10.0.0.1", "10.0.0.2"]);
        let forwarder = Arc::new(FakeForwarder::new());
        forwarder.fail_first("10.0.0.2", 2);
        let dispatcher = dispatcher(pool.clone(), forwarder.clone());

        let response = dispatcher.handle(request("ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream_of(&response), "10.0.0.2");

        // Two failures absorbed on the same server, third forward succeeded.
        assert_eq!(forwarder.calls(), vec!["10.0.0.2"; 3]);
        assert!(pool.get(1).is_alive().await);
    }

    #[tokio::test]
    async fn fails_over_after_exhausting_retries() {
        let pool = pool_of(&["10.0.0.1", "10.0.0.2"]);
        let forwarder = Arc::new(FakeForwarder::new());
        forwarder.always_fail("10.0.0.2");
        let dispatcher = dispatcher(pool.clone(), forwarder.clone());

        let response = dispatcher.handle(request("ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream_of(&response), "10.0.0.1");

        // Initial forward plus three retries on the failing server, then one
        // forward to the failover target.
        assert_eq!(
            forwarder.calls(),
            vec![
                "10.0.0.2",
                "10.0.0.2",
                "10.0.0.2",
                "10.0.0.2",
                "10.0.0.1"
            ]
        );
        assert!(!pool.get(1).is_alive().await);
        assert!(pool.get(0).is_alive().await);
    }

    #[tokio::test]
    async fn exhausts_attempts_when_every_server_fails() {
        let pool = pool_of(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let forwarder = Arc::new(FakeForwarder::new());
        for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            forwarder.always_fail(host);
        }
        let dispatcher = dispatcher(pool.clone(), forwarder.clone());

        let response = dispatcher.handle(request("ping")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // Three dispatch cycles, each spending four forwards on its server.
        assert_eq!(forwarder.calls().len(), 12);
        for position in 0..3 {
            assert!(!pool.get(position).is_alive().await);
        }
    }

    #[tokio::test]
    async fn responds_unavailable_without_forwarding_when_all_dead() {
        let pool = pool_of(&["10.0.0.1", "10.0.0.2"]);
        for uid in 0..2 {
            pool.mark_dead(uid).await;
        }
        let forwarder = Arc::new(FakeForwarder::new());
        let dispatcher = dispatcher(pool, forwarder.clone());

        let response = dispatcher.handle(request("ping")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(forwarder.calls().is_empty());
    }

    #[tokio::test]
    async fn body_survives_retries() {
        let pool = pool_of(&["10.0.0.1"]);
        let forwarder = Arc::new(FakeForwarder::new());
        forwarder.fail_first("10.0.0.1", 3);
        let dispatcher = dispatcher(pool, forwarder.clone());

        let response = dispatcher.handle(request("payload")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"payload");
        assert_eq!(forwarder.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_request_abandons_retry_chain() {
        let pool = pool_of(&["10.0.0.1"]);
        let forwarder = Arc::new(FakeForwarder::new());
        forwarder.always_fail("10.0.0.1");
        let dispatcher = Dispatcher::new(
            pool,
            Arc::new(RoundRobin::new()),
            forwarder.clone(),
            RetryPolicy {
                max_attempts: 3,
                max_retries: 3,
                backoff: Duration::from_secs(60),
            },
            None,
        );

        {
            let mut dispatch = Box::pin(dispatcher.handle(request("ping")));
            // The first forward fails and the request parks in the backoff
            // sleep, which the paused clock never lets elapse.
            for _ in 0..4 {
                assert!(futures::poll!(dispatch.as_mut()).is_pending());
            }
            assert_eq!(forwarder.calls().len(), 1);
        } // client connection gone: the dispatch future is dropped here

        tokio::time::advance(Duration::from_secs(3600)).await;
        tokio::task::yield_now().await;

        // No retry fired after the drop; the backoff timer went with it.
        assert_eq!(forwarder.calls().len(), 1);
    }

    #[test]
    fn attempt_state_transitions() {
        let state = AttemptState::new();
        assert_eq!(state, AttemptState { attempts: 1, retries: 0 });

        let state = state.retried().retried();
        assert_eq!(state, AttemptState { attempts: 1, retries: 2 });

        let state = state.failed_over();
        assert_eq!(state, AttemptState { attempts: 2, retries: 0 });
    }
}

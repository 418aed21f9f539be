// src/dispatch/forwarder.rs
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, CONNECTION, HOST};
use hyper::{Body, Client, Request, Response, Uri};
use hyper_tls::HttpsConnector;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(#[from] hyper::http::Error),
}

/// Relays one request to a chosen upstream. The dispatcher owns retry and
/// failover; a forwarder only reports success or a transport-level failure.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, target: &Url, req: Request<Body>) -> Result<Response<Body>, ForwardError>;
}

/// Hyper-client forwarder for http and https upstreams.
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl HttpForwarder {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build(HttpsConnector::new()),
        }
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        target: &Url,
        mut req: Request<Body>,
    ) -> Result<Response<Body>, ForwardError> {
        *req.uri_mut() = rewrite_uri(target, req.uri())?;
        strip_hop_by_hop(req.headers_mut());

        Ok(self.client.request(req).await?)
    }
}

// RFC 7230 §6.1 hop-by-hop headers, scoped to the inbound connection.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Drop headers that belong to the client connection, not the upstream one.
/// Host goes too so hyper derives it from the rewritten target URI.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();
    for name in connection_named {
        headers.remove(name);
    }

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(HOST);
}

/// Point the request at the target: target scheme and authority, target base
/// path joined with the inbound path and query.
fn rewrite_uri(target: &Url, original: &Uri) -> Result<Uri, ForwardError> {
    let host = target
        .host_str()
        .ok_or_else(|| ForwardError::Unreachable(format!("no host in upstream url {}", target)))?;
    let authority = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let base = target.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let joined = if base.is_empty() {
        path_and_query.to_string()
    } else {
        format!("{}{}", base, path_and_query)
    };

    Ok(Uri::builder()
        .scheme(target.scheme())
        .authority(authority)
        .path_and_query(joined)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn rewrites_scheme_and_authority() {
        let uri = rewrite_uri(&url("http://10.0.0.1:8081"), &"/api/ping".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.1:8081/api/ping");
    }

    #[test]
    fn omits_default_port() {
        let uri = rewrite_uri(&url("https://backend.example.com"), &"/".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "https://backend.example.com/");
    }

    #[test]
    fn joins_target_base_path() {
        let uri = rewrite_uri(&url("http://10.0.0.1:8081/v2/"), &"/ping".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.1:8081/v2/ping");
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("host", "lb.example.com"),
            ("connection", "keep-alive, x-trace"),
            ("keep-alive", "timeout=5"),
            ("x-trace", "abc123"),
            ("te", "trailers"),
            ("upgrade", "websocket"),
            ("proxy-connection", "keep-alive"),
            ("transfer-encoding", "chunked"),
            ("accept", "application/json"),
            ("x-request-id", "42"),
        ] {
            headers.insert(
                name.parse::<HeaderName>().unwrap(),
                value.parse().unwrap(),
            );
        }

        strip_hop_by_hop(&mut headers);

        // End-to-end headers survive; everything connection-scoped is gone,
        // including the header named by the inbound Connection value.
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["accept"], "application/json");
        assert_eq!(headers["x-request-id"], "42");
    }

    #[test]
    fn preserves_query_string() {
        let uri =
            rewrite_uri(&url("http://10.0.0.1:8081"), &"/search?q=rust".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.1:8081/search?q=rust");
    }
}

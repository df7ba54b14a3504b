//! Streaming relay to the single backend.
//!
//! # Request Flow
//!
//! ```text
//! Request<B> ──► target_uri()          backend base + path + query
//!            ──► strip hop-by-hop      Connection-listed headers too
//!            ──► X-Forwarded-For       append peer address
//!            ──► client.request()      bounded by connect + response timeout
//!            ──► strip hop-by-hop      on the response
//!            ──► Response<UnifiedBody> body streamed, never buffered
//! ```
//!
//! Failures become [`ProxyError`] and are answered with 502 or 504. Nothing
//! is retried. Dropping the returned future (client went away) drops the
//! backend request and releases its connection.

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Uri;
use http_body_util::{BodyExt, BodyStream, StreamBody};
use hyper::body::Body;
use hyper::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};
use usegate_core::metrics::GateMetrics;

use crate::error::{ProxyError, ProxyResult};
use crate::proxy_config::ProxyConfig;

/// Type alias for the client's streaming body type.
type ClientBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Type alias for the unified response body type.
///
/// Relayed responses stream; local responses use `Full<Bytes>`. Both are
/// boxed for a unified return type.
pub type UnifiedBody = http_body_util::combinators::BoxBody<Bytes, ProxyError>;

/// Headers that describe one connection and are never relayed.
const HOP_BY_HOP_HEADERS: &[&str] = &[
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

/// HTTP(S) client bound to one backend base URL.
#[derive(Clone)]
pub struct ForwardingClient {
    client: Client<HttpsConnector<HttpConnector>, ClientBody>,
    /// Base URL without a trailing slash.
    backend_url: Arc<str>,
    config: ProxyConfig,
    metrics: Option<Arc<GateMetrics>>,
}

impl ForwardingClient {
    /// Create a client for `backend_url`.
    ///
    /// # Errors
    ///
    /// - `InvalidUri` if `backend_url` is not an absolute http(s) URL
    /// - `Connection` if the TLS provider or native roots cannot be loaded
    pub fn new(backend_url: &str, config: ProxyConfig) -> ProxyResult<Self> {
        usegate_core::config::validate_backend_url(backend_url)
            .map_err(|e| ProxyError::InvalidUri(e.to_string()))?;

        // Install default crypto provider for rustls exactly once.
        static RUSTLS_INIT: std::sync::OnceLock<Result<(), ()>> = std::sync::OnceLock::new();
        let init_result = RUSTLS_INIT.get_or_init(|| {
            rustls::crypto::ring::default_provider()
                .install_default()
                .map_err(|_| ())
        });
        if init_result.is_err() {
            return Err(ProxyError::Connection(
                "Failed to install rustls crypto provider".into(),
            ));
        }

        let mut http_connector = HttpConnector::new();
        http_connector.set_nodelay(config.tcp_nodelay);
        http_connector.set_connect_timeout(Some(config.connect_timeout));
        http_connector.enforce_http(false);

        let https_connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ProxyError::Connection(format!("Failed to load native TLS roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build(https_connector);

        Ok(Self {
            client,
            backend_url: Arc::from(backend_url.trim_end_matches('/')),
            config,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<GateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    /// Relay `req` to the backend and stream the response back.
    ///
    /// Method, path, query, body and every end-to-end header (including
    /// `X-Use-Case-ID`) are preserved.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        peer: Option<SocketAddr>,
    ) -> ProxyResult<Response<UnifiedBody>>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: std::fmt::Display,
    {
        let target_uri = self.target_uri(req.uri())?;
        let (parts, body) = req.into_parts();

        debug!(
            method = %parts.method,
            target = %target_uri,
            "Forwarding request"
        );

        let mut upstream_req = Request::builder()
            .method(parts.method)
            .uri(target_uri);

        let headers = upstream_req.headers_mut().ok_or_else(|| {
            error!("Failed to get mutable headers from request builder");
            ProxyError::Connection("Request builder in invalid state".to_string())
        })?;
        *headers = end_to_end_headers(parts.headers);
        // The client derives Host from the target URI.
        headers.remove(header::HOST);
        append_forwarded_for(headers, peer);

        let body_stream = BodyStream::new(body);
        let mapped_stream = body_stream.map(|result| {
            result.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                Box::new(std::io::Error::other(format!("Body stream error: {}", e)))
            })
        });
        let boxed_body: ClientBody = BodyExt::boxed(StreamBody::new(mapped_stream));

        let upstream_req = upstream_req.body(boxed_body).map_err(|e| {
            error!(error = %e, "Failed to build upstream request");
            ProxyError::InvalidUri(format!("Failed to build request: {}", e))
        })?;

        let started = Instant::now();
        let upstream_res =
            match tokio::time::timeout(self.config.response_timeout, self.client.request(upstream_req))
                .await
            {
                Ok(Ok(res)) => res,
                Ok(Err(e)) => return Err(self.record_error(map_hyper_error(e))),
                Err(_) => {
                    warn!(
                        backend = %self.backend_url,
                        timeout_secs = self.config.response_timeout.as_secs(),
                        "Upstream response timeout"
                    );
                    return Err(self.record_error(ProxyError::Timeout(format!(
                        "no response within {}s",
                        self.config.response_timeout.as_secs()
                    ))));
                }
            };

        if let Some(metrics) = &self.metrics {
            metrics.record_upstream_duration(
                upstream_res.status().as_u16(),
                started.elapsed().as_secs_f64(),
            );
        }

        let (mut parts, body) = upstream_res.into_parts();
        parts.headers = end_to_end_headers(std::mem::take(&mut parts.headers));

        let body_stream = BodyStream::new(body);
        let mapped_stream = body_stream.map(|result| {
            result.map_err(|e| ProxyError::Connection(format!("Body stream error: {}", e)))
        });
        let boxed_body: UnifiedBody = BodyExt::boxed(StreamBody::new(mapped_stream));

        Ok(Response::from_parts(parts, boxed_body))
    }

    /// Backend base URL joined with the request's path and query.
    pub(crate) fn target_uri(&self, uri: &Uri) -> ProxyResult<Uri> {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let full_uri = format!("{}{}", self.backend_url, path);
        full_uri
            .parse()
            .map_err(|e| ProxyError::InvalidUri(format!("Failed to parse upstream URI: {}", e)))
    }

    fn record_error(&self, err: ProxyError) -> ProxyError {
        if let Some(metrics) = &self.metrics {
            metrics.record_upstream_error(err.kind());
        }
        err
    }
}

/// Drop hop-by-hop headers and any header the `Connection` header names.
fn end_to_end_headers(mut headers: HeaderMap) -> HeaderMap {
    let mut doomed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    doomed.extend(
        headers
            .keys()
            .filter(|name| is_hop_by_hop_header(name.as_str()))
            .cloned(),
    );

    for name in doomed {
        headers.remove(name);
    }
    headers
}

fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Append the peer IP to `X-Forwarded-For`, keeping earlier hops.
fn append_forwarded_for(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    let Some(peer) = peer else { return };
    let ip = peer.ip().to_string();

    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing.trim(), ip),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
}

/// Flatten an error and its sources into one lowercase string.
fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out.to_lowercase()
}

/// Map hyper_util client errors to appropriate ProxyError variants.
///
/// - Connect timeout -> `ProxyError::Timeout` (504)
/// - Connection refused -> `ProxyError::ConnectionRefused` (502)
/// - Other connect errors -> `ProxyError::Connection` (502)
/// - Closed, canceled or reset mid-request -> `ProxyError::Connection` (502)
fn map_hyper_error(e: hyper_util::client::legacy::Error) -> ProxyError {
    let chain = error_chain(&e);

    if chain.contains("timeout") || chain.contains("timed out") {
        warn!(error = %chain, "Upstream timeout");
        return ProxyError::Timeout(format!("Upstream timeout: {}", chain));
    }

    if chain.contains("connection refused") {
        warn!(error = %chain, "Upstream connection refused");
        return ProxyError::ConnectionRefused(format!("Upstream refused connection: {}", chain));
    }

    if e.is_connect() || chain.contains("connect") {
        warn!(error = %chain, "Upstream connection failed");
        return ProxyError::Connection(format!("Failed to connect to upstream: {}", chain));
    }

    warn!(error = %chain, "Upstream error");
    ProxyError::Connection(format!("Upstream error: {}", chain))
}

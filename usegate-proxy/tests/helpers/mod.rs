//! Test helpers for proxy integration tests.
//!
//! - Stub backend on an ephemeral port that records what it received
//! - In-process proxy wired the same way as the binary

#![allow(dead_code)] // Not every test file uses every helper

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
};
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use usegate_core::allowlist::{AllowlistStore, StoreOptions};
use usegate_core::config::{ConfigDocument, load_document, write_document};
use usegate_core::metrics::GateMetrics;
use usegate_core::policy::PolicyGate;
use usegate_proxy::admin::{self, AdminState};
use usegate_proxy::forwarding::ForwardingClient;
use usegate_proxy::gate_service::GateService;
use usegate_proxy::logging_layer::logging_layer;
use usegate_proxy::proxy_config::ProxyConfig;
use usegate_proxy::server::{DrainResult, serve};

// ─────────────────────────────────────────────────────────────────────────────
// Stub backend
// ─────────────────────────────────────────────────────────────────────────────

/// What the stub backend saw on its most recent request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone, Default)]
struct StubState {
    last: Arc<Mutex<Option<SeenRequest>>>,
    hits: Arc<Mutex<usize>>,
}

/// Running stub backend.
pub struct StubBackend {
    pub addr: SocketAddr,
    state: StubState,
    handle: JoinHandle<()>,
}

impl StubBackend {
    /// Start the stub on `127.0.0.1:0`.
    ///
    /// Routes:
    /// - `POST /api/2.0/genie_dummy/spaces/start-conversation` - 201 with the
    ///   received use case id
    /// - `GET /status/{code}` - answers with that status
    /// - `GET /slow` - answers after two seconds
    /// - anything else - 200 echo of method, path and query
    pub async fn start() -> Self {
        let state = StubState::default();
        let app = Router::new()
            .route(
                "/api/2.0/genie_dummy/spaces/start-conversation",
                post(start_conversation),
            )
            .route("/status/{code}", get(fixed_status))
            .route("/slow", get(slow))
            .fallback(echo)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn last_request(&self) -> Option<SeenRequest> {
        self.state.last.lock().clone()
    }

    pub fn hits(&self) -> usize {
        *self.state.hits.lock()
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn record(state: &StubState, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) {
    *state.hits.lock() += 1;
    *state.last.lock() = Some(SeenRequest {
        method,
        uri,
        headers,
        body,
    });
}

async fn start_conversation(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let use_case_id = headers
        .get("x-use-case-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    record(&state, method, uri, headers, body);

    (
        StatusCode::CREATED,
        [("x-backend", "stub")],
        Json(serde_json::json!({
            "conversation_id": "conv-1",
            "response": "hello from the stub",
            "use_case_id": use_case_id,
        })),
    )
}

async fn fixed_status(
    State(state): State<StubState>,
    Path(code): Path<u16>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> impl IntoResponse {
    record(&state, method, uri, headers, Bytes::new());
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("status {code}"))
}

async fn slow(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> &'static str {
    record(&state, method, uri, headers, Bytes::new());
    tokio::time::sleep(Duration::from_secs(2)).await;
    "finally"
}

async fn echo(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let reply = serde_json::json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "body_len": body.len(),
    });
    record(&state, method, uri, headers, body);
    Json(reply)
}

// ─────────────────────────────────────────────────────────────────────────────
// In-process proxy
// ─────────────────────────────────────────────────────────────────────────────

/// Running proxy plus the pieces tests poke at.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub store: Arc<AllowlistStore>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<DrainResult>,
    _dir: TempDir,
}

impl TestProxy {
    /// Proxy in front of `backend_url` with the built-in allowlist.
    pub async fn start(backend_url: &str) -> Self {
        Self::start_with(backend_url, ProxyConfig::default(), |_| {}).await
    }

    /// Proxy with custom runtime tuning and a hook to edit the allowlist file
    /// before the store opens it.
    pub async fn start_with(
        backend_url: &str,
        config: ProxyConfig,
        edit: impl FnOnce(&mut ConfigDocument),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let mut document = ConfigDocument::builtin();
        edit(&mut document);
        write_document(&path, &document).unwrap();

        let mut registry = Registry::default();
        let metrics = Arc::new(GateMetrics::new(&mut registry));
        let store = Arc::new(
            AllowlistStore::open(
                &path,
                StoreOptions {
                    metrics: Some(metrics.clone()),
                    ..StoreOptions::default()
                },
            )
            .unwrap(),
        );

        let forwarding = ForwardingClient::new(backend_url, config.clone())
            .unwrap()
            .with_metrics(metrics.clone());
        let gate = PolicyGate::new(store.clone()).with_metrics(metrics);
        let local = admin::router(AdminState {
            store: store.clone(),
            prom_registry: Arc::new(registry),
            backend_url: Arc::from(backend_url),
        });
        let service = ServiceBuilder::new()
            .layer(logging_layer())
            .service(GateService::new(gate, forwarding, local));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, service, config, shutdown.clone()));

        Self {
            addr,
            store,
            shutdown,
            handle,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Rewrite the allowlist file behind the store's back.
    pub fn edit_file(&self, edit: impl FnOnce(&mut ConfigDocument)) {
        let mut document = load_document(self.store.path()).unwrap();
        edit(&mut document);
        write_document(self.store.path(), &document).unwrap();
    }

    /// Stop accepting and wait for the drain to finish.
    pub async fn stop(self) -> DrainResult {
        self.shutdown.cancel();
        self.handle.await.unwrap()
    }
}

/// HTTP client without a connection pool, so each request is a fresh
/// connection and server shutdown is never held up by idle keep-alives.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

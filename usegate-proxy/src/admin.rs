//! Local endpoints served by the proxy itself.
//!
//! # Endpoints
//!
//! - `GET /` - service banner with the allowed identifiers
//! - `GET /health` - liveness
//! - `GET /config` - current allowlist, descriptions and security flags
//! - `POST /config/reload` - re-read the allowlist file
//! - `GET /metrics` - Prometheus metrics (OpenMetrics format)
//!
//! These share the proxy port. They pass through the gate like any other
//! path, so they answer without `X-Use-Case-ID` only while listed in
//! `proxy.exempt_paths` (the default).

use axum::{
    Json, Router,
    extract::State,
    http::{Method, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use prometheus_client::registry::Registry;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use usegate_core::allowlist::{AllowlistStore, SnapshotOrigin};

/// Name reported by `GET /`.
pub const SERVICE_NAME: &str = "Use-Case-ID Proxy";

/// Shared state for the local endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<AllowlistStore>,
    /// Prometheus registry for the metrics endpoint.
    pub prom_registry: Arc<Registry>,
    /// Effective backend URL (after command-line overrides).
    pub backend_url: Arc<str>,
}

/// Whether `method` + `path` is handled by [`router`] rather than forwarded.
pub fn is_local_route(method: &Method, path: &str) -> bool {
    (method == Method::GET && matches!(path, "/" | "/health" | "/config" | "/metrics"))
        || (method == Method::POST && path == "/config/reload")
}

/// Create the Axum router for the local endpoints.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .route("/config/reload", post(reload_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn root_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    Json(json!({
        "service": SERVICE_NAME,
        "status": "running",
        "allowed_use_cases": snapshot.ids(),
        "backend_url": &*state.backend_url,
    }))
}

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    Json(json!({
        "status": "healthy",
        "allowed_use_cases": snapshot.ids(),
    }))
}

async fn config_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    Json(json!({
        "allowed_use_cases": snapshot.ids(),
        "use_case_descriptions": snapshot.descriptions(),
        "security_config": snapshot.security(),
        "backend_url": &*state.backend_url,
    }))
}

/// Reload on a blocking thread; file I/O and the writer lock stay off the
/// runtime workers.
async fn reload_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let store = state.store.clone();
    let snapshot = match tokio::task::spawn_blocking(move || store.reload()).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, "Reload task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("Error reloading config: {e}") })),
            )
                .into_response();
        }
    };

    if snapshot.origin() != SnapshotOrigin::File {
        warn!(
            origin = snapshot.origin().as_str(),
            "Reload requested but the configuration file could not be loaded"
        );
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "detail": format!(
                    "Error reloading config: {} could not be loaded, serving {} allowlist",
                    state.store.path().display(),
                    snapshot.origin().as_str()
                ),
            })),
        )
            .into_response();
    }

    info!(use_cases = snapshot.len(), "Configuration reloaded via endpoint");
    Json(json!({
        "status": "success",
        "message": "Configuration reloaded",
        "allowed_use_cases": snapshot.ids(),
    }))
    .into_response()
}

/// Metrics handler using prometheus-client (OpenMetrics format).
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let mut buffer = String::new();

    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &state.prom_registry) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}

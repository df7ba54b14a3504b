//! UseGate proxy - admits requests by `X-Use-Case-ID` and relays them to one
//! backend.
//!
//! Startup: load the allowlist file, build the gate, forwarding client and
//! local endpoints, start the reload task and signal handlers, then serve
//! until SIGINT/SIGTERM and drain.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use usegate_core::allowlist::{AllowlistStore, StoreOptions, spawn_reload_task};
use usegate_core::config::{
    ConfigError, StoreDefaults, load_and_validate, load_document, resolve_config_path,
};
use usegate_core::metrics::GateMetrics;
use usegate_core::policy::PolicyGate;
use usegate_proxy::admin::{self, AdminState};
use usegate_proxy::forwarding::ForwardingClient;
use usegate_proxy::gate_service::GateService;
use usegate_proxy::logging_layer::logging_layer;
use usegate_proxy::proxy_config::ProxyConfig;
use usegate_proxy::server::{DrainResult, serve};

/// Command-line flags. Values given here override the file's `proxy` block.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the allowlist file (default: ./config.yaml)
    #[arg(long, env = "USEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend base URL, e.g. "http://localhost:8002"
    #[arg(long, env = "USEGATE_BACKEND_URL")]
    backend_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_path = resolve_config_path(args.config.as_deref());

    // RUST_LOG wins; otherwise the file's logging.level.
    let file_level = load_document(&config_path)
        .ok()
        .map(|document| document.logging.level);
    let default_filter = filter_directive(file_level.as_deref().unwrap_or("INFO"));

    // The guard must live for the whole program so buffered lines are flushed.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let proxy_config = ProxyConfig::from_env();
    let store_defaults = StoreDefaults::from_env();

    let mut prom_registry = prometheus_client::registry::Registry::default();
    let metrics = Arc::new(GateMetrics::new(&mut prom_registry));
    let prom_registry = Arc::new(prom_registry);

    let store = AllowlistStore::open(
        &config_path,
        StoreOptions {
            lock_timeout: store_defaults.lock_timeout,
            backup_policy: store_defaults.backup_policy,
            metrics: Some(metrics.clone()),
            ..StoreOptions::default()
        },
    )
    .map_err(|e| {
        error!(error = %e, path = %config_path.display(), "Cannot open allowlist file - refusing to start");
        e
    })?;
    let store = Arc::new(store);

    check_config_file(&config_path).map_err(|e| {
        error!(error = %e, path = %config_path.display(), "Invalid configuration - refusing to start");
        e
    })?;

    let snapshot = store.snapshot();
    let proxy_section = &snapshot.document().proxy;
    let host = args.bind.clone().unwrap_or_else(|| proxy_section.host.clone());
    let port = args.port.unwrap_or(proxy_section.port);
    let backend_url = args
        .backend_url
        .clone()
        .unwrap_or_else(|| proxy_section.backend_url.clone());

    let forwarding = ForwardingClient::new(&backend_url, proxy_config.clone())
        .map_err(|e| {
            error!(error = %e, backend_url = %backend_url, "Invalid backend URL - refusing to start");
            e
        })?
        .with_metrics(metrics.clone());

    let gate = PolicyGate::new(store.clone()).with_metrics(metrics.clone());

    let local = admin::router(AdminState {
        store: store.clone(),
        prom_registry,
        backend_url: Arc::from(backend_url.as_str()),
    });

    let cors = proxy_config
        .cors_enabled
        .then(CorsLayer::very_permissive);
    let service_stack = ServiceBuilder::new()
        .layer(logging_layer())
        .option_layer(cors)
        .service(GateService::new(gate, forwarding, local));

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone(), store.clone());
    let reload_task = spawn_reload_task(
        store.clone(),
        store_defaults.reload_interval,
        shutdown.clone(),
    );

    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        e
    })?;

    info!(
        addr = %addr,
        backend_url = %backend_url,
        config = %config_path.display(),
        use_cases = snapshot.len(),
        source = snapshot.origin().as_str(),
        reload_interval_secs = store_defaults.reload_interval.as_secs(),
        backup_policy = %store_defaults.backup_policy,
        "UseGate proxy listening"
    );
    drop(snapshot);

    let drain_result = serve(listener, service_stack, proxy_config, shutdown.clone()).await;

    if let Some(handle) = reload_task
        && let Err(e) = handle.await
    {
        warn!(error = %e, "Reload task ended abnormally");
    }

    match drain_result {
        DrainResult::Complete => {
            info!("All connections drained, shutting down cleanly");
            Ok(())
        }
        DrainResult::Timeout { remaining } => Err(format!(
            "Drain timeout exceeded with {} remaining connections",
            remaining
        )
        .into()),
    }
}

/// Map a `logging.level` value to an `EnvFilter` directive.
fn filter_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" | "FATAL" => "error",
        _ => "info",
    }
}

/// Refuse a file that parses but names a relative exempt path or an unusable
/// backend URL. Unreadable files are not fatal: the store serves its fallback.
fn check_config_file(path: &Path) -> Result<(), ConfigError> {
    match load_and_validate(path) {
        Err(e @ (ConfigError::InvalidExemptPath { .. } | ConfigError::InvalidUrl { .. })) => Err(e),
        _ => Ok(()),
    }
}

/// Install signal handlers.
///
/// - SIGINT (Ctrl+C), SIGTERM: begin graceful shutdown
/// - SIGHUP: reload the allowlist file
fn setup_signal_handlers(shutdown: CancellationToken, store: Arc<AllowlistStore>) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_sigterm = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown");
                    shutdown_sigterm.cancel();
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                }
            }
        });

        tokio::spawn(async move {
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGHUP");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = sighup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!("Received SIGHUP, reloading allowlist");
                        let store = store.clone();
                        match tokio::task::spawn_blocking(move || store.reload()).await {
                            Ok(snapshot) => info!(
                                use_cases = snapshot.len(),
                                source = snapshot.origin().as_str(),
                                "Allowlist reloaded"
                            ),
                            Err(e) => error!(error = %e, "Reload task failed"),
                        }
                    }
                }
            }
        });
    }

    #[cfg(not(unix))]
    let _ = (shutdown, store);
}

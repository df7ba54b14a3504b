//! Runtime tuning for the UseGate proxy.
//!
//! Listener address, backend URL and allowlist location come from the YAML
//! file and the command line. Everything here is socket and timeout tuning,
//! read from `USEGATE_*` environment variables.

use std::time::Duration;
use tracing::warn;

/// Runtime configuration for the UseGate proxy.
///
/// All parameters can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Listener
    // ─────────────────────────────────────────────────────────────────────────
    /// Enable TCP_NODELAY on both legs
    pub tcp_nodelay: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_secs: u64,

    /// Socket buffer size (SO_RCVBUF / SO_SNDBUF)
    pub socket_buffer_size: usize,

    /// Connections served at once. Further connections get a raw 503.
    pub max_concurrent_connections: usize,

    /// How long shutdown waits for in-flight connections.
    pub drain_timeout: Duration,

    /// Answer CORS preflights and add permissive CORS headers.
    pub cors_enabled: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // Backend
    // ─────────────────────────────────────────────────────────────────────────
    /// TCP connect timeout to the backend.
    pub connect_timeout: Duration,

    /// Time allowed until the backend returns response headers.
    pub response_timeout: Duration,

    /// Maximum number of idle connections per host in the connection pool.
    pub pool_max_idle_per_host: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            tcp_keepalive_secs: 60,
            socket_buffer_size: 262144, // 256 KB
            max_concurrent_connections: 10000,
            drain_timeout: Duration::from_secs(25),
            cors_enabled: true,

            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 128,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `USEGATE_TCP_NODELAY` (default: true)
    /// - `USEGATE_TCP_KEEPALIVE_SECS` (default: 60)
    /// - `USEGATE_SOCKET_BUFFER_SIZE` (default: 262144)
    /// - `USEGATE_MAX_CONCURRENT_CONNECTIONS` (default: 10000)
    /// - `USEGATE_DRAIN_TIMEOUT_SECS` (default: 25)
    /// - `USEGATE_CORS` (default: true)
    /// - `USEGATE_CONNECT_TIMEOUT_SECS` (default: 5)
    /// - `USEGATE_RESPONSE_TIMEOUT_SECS` (default: 30)
    /// - `USEGATE_POOL_MAX_IDLE` (default: 128)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            tcp_nodelay: parse_env_warn("USEGATE_TCP_NODELAY", default.tcp_nodelay),

            tcp_keepalive_secs: parse_env_warn(
                "USEGATE_TCP_KEEPALIVE_SECS",
                default.tcp_keepalive_secs,
            ),

            socket_buffer_size: parse_env_warn(
                "USEGATE_SOCKET_BUFFER_SIZE",
                default.socket_buffer_size,
            ),

            max_concurrent_connections: parse_env_warn(
                "USEGATE_MAX_CONCURRENT_CONNECTIONS",
                default.max_concurrent_connections,
            ),

            drain_timeout: Duration::from_secs(parse_env_warn(
                "USEGATE_DRAIN_TIMEOUT_SECS",
                default.drain_timeout.as_secs(),
            )),

            cors_enabled: parse_env_warn("USEGATE_CORS", default.cors_enabled),

            connect_timeout: Duration::from_secs(parse_env_warn(
                "USEGATE_CONNECT_TIMEOUT_SECS",
                default.connect_timeout.as_secs(),
            )),

            response_timeout: Duration::from_secs(parse_env_warn(
                "USEGATE_RESPONSE_TIMEOUT_SECS",
                default.response_timeout.as_secs(),
            )),

            pool_max_idle_per_host: parse_env_warn(
                "USEGATE_POOL_MAX_IDLE",
                default.pool_max_idle_per_host,
            ),
        }
    }
}

/// Parse an environment variable with a warning on invalid values.
///
/// If the env var is set but cannot be parsed, logs a warning and returns the default.
/// If the env var is not set, returns the default silently.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

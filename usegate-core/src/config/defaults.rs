//! Built-in default values.
//!
//! Everything that falls back to a constant when the file is silent lives
//! here so the proxy, the CLI and the tests agree on one set of values.

use std::time::Duration;
use tracing::warn;

use crate::allowlist::BackupPolicy;

/// Listener address written into a freshly created file.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Listener port written into a freshly created file.
pub const DEFAULT_PORT: u16 = 8001;

/// Backend the proxy forwards to when nothing else is configured.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8002";

pub const DEFAULT_LOG_LEVEL: &str = "INFO";

pub const DEFAULT_LOG_FORMAT: &str = "%(asctime)s - %(name)s - %(levelname)s - %(message)s";

/// File name used when no path is given anywhere.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Paths that bypass the header check out of the box.
pub const DEFAULT_EXEMPT_PATHS: &[&str] = &[
    "/",
    "/health",
    "/config",
    "/config/reload",
    "/metrics",
    "/docs/*",
    "/openapi.json",
    "/redoc/*",
];

/// The seeded allowlist: `(id, description)`.
pub const SEEDED_USE_CASES: &[(&str, &str)] = &[
    ("100000", "Primary client application"),
    ("100050", "Mobile application v2"),
    ("101966", "Analytics dashboard"),
    ("102550", "Admin panel interface"),
    ("103366", "External API integration"),
];

/// Store knobs, overridable from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDefaults {
    /// Interval of the background reload check. Zero disables the timer.
    pub reload_interval: Duration,

    /// How long a writer waits for the cross-process file lock.
    pub lock_timeout: Duration,

    /// What a mutation does when its backup cannot be written.
    pub backup_policy: BackupPolicy,
}

impl Default for StoreDefaults {
    fn default() -> Self {
        Self {
            reload_interval: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
            backup_policy: BackupPolicy::default(),
        }
    }
}

impl StoreDefaults {
    /// Create defaults from environment variables.
    ///
    /// # Environment Variables
    /// - `USEGATE_RELOAD_INTERVAL_SECS`
    /// - `USEGATE_LOCK_TIMEOUT_MS`
    /// - `USEGATE_BACKUP_POLICY` (`fail-open` or `fail-closed`)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            reload_interval: Duration::from_secs(env_u64(
                "USEGATE_RELOAD_INTERVAL_SECS",
                default.reload_interval.as_secs(),
            )),
            lock_timeout: Duration::from_millis(env_u64(
                "USEGATE_LOCK_TIMEOUT_MS",
                default.lock_timeout.as_millis() as u64,
            )),
            backup_policy: env_backup_policy(default.backup_policy),
        }
    }
}

fn env_backup_policy(default: BackupPolicy) -> BackupPolicy {
    let Ok(val) = std::env::var("USEGATE_BACKUP_POLICY") else {
        return default;
    };
    val.trim().parse().unwrap_or_else(|e: String| {
        warn!(
            env_var = "USEGATE_BACKUP_POLICY",
            error = %e,
            default = %default,
            "Invalid backup policy, using default"
        );
        default
    })
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(val) => match val.parse::<u64>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

//! On-disk document schema.
//!
//! The allowlist file is a YAML document with four known sections. Any other
//! top-level section (for example settings consumed by a chat front-end) is
//! carried through load and save untouched.
//!
//! # Example
//! ```yaml
//! proxy:
//!   host: 0.0.0.0
//!   port: 8001
//!   backend_url: http://localhost:8002
//! access_control:
//!   allowed_use_cases: ["100000", "100050"]
//!   use_case_descriptions:
//!     "100000": Primary client application
//! security:
//!   require_use_case_header: true
//!   case_sensitive_matching: false
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::defaults::{
    DEFAULT_BACKEND_URL, DEFAULT_EXEMPT_PATHS, DEFAULT_HOST, DEFAULT_LOG_FORMAT,
    DEFAULT_LOG_LEVEL, DEFAULT_PORT, SEEDED_USE_CASES,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-Level Document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root of the allowlist file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConfigDocument {
    /// Listener and backend settings.
    #[serde(default)]
    pub proxy: ProxySection,

    /// The allowlist itself.
    #[serde(default)]
    pub access_control: AccessControl,

    /// Log level and format for the proxy process.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Gate behaviour flags.
    #[serde(default)]
    pub security: SecuritySection,

    /// Unrecognised top-level sections, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ConfigDocument {
    /// The built-in document: default listener settings plus the five seeded
    /// use cases.
    pub fn builtin() -> Self {
        Self {
            proxy: ProxySection::default(),
            access_control: AccessControl::builtin(),
            logging: LoggingSection::default(),
            security: SecuritySection::default(),
            extra: BTreeMap::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `proxy:` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySection {
    pub host: String,
    pub port: u16,
    pub backend_url: String,
    /// Paths that bypass the header check. An entry ending in `/*` covers the
    /// prefix and everything below it.
    pub exempt_paths: Vec<String>,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            exempt_paths: DEFAULT_EXEMPT_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// `access_control:` section.
///
/// Identifiers may be written as YAML strings or bare integers; both are
/// normalised to strings on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessControl {
    #[serde(deserialize_with = "deserialize_ids")]
    pub allowed_use_cases: Vec<String>,

    #[serde(deserialize_with = "deserialize_descriptions")]
    pub use_case_descriptions: BTreeMap<String, String>,
}

impl AccessControl {
    /// The seeded allowlist shipped with the proxy.
    pub fn builtin() -> Self {
        Self {
            allowed_use_cases: SEEDED_USE_CASES
                .iter()
                .map(|(id, _)| id.to_string())
                .collect(),
            use_case_descriptions: SEEDED_USE_CASES
                .iter()
                .map(|(id, desc)| (id.to_string(), desc.to_string()))
                .collect(),
        }
    }
}

/// `logging:` section. `format` is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: Some(DEFAULT_LOG_FORMAT.to_string()),
        }
    }
}

/// `security:` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SecuritySection {
    pub require_use_case_header: bool,
    pub case_sensitive_matching: bool,
    pub log_rejected_requests: bool,
    /// Whether 403 bodies list the allowed identifiers.
    pub expose_allowed_use_cases: bool,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            require_use_case_header: true,
            case_sensitive_matching: false,
            log_rejected_requests: true,
            expose_allowed_use_cases: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifier normalisation
// ─────────────────────────────────────────────────────────────────────────────

/// A use-case identifier as it may appear in YAML.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
enum RawId {
    Integer(i64),
    Text(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Integer(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

fn deserialize_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<RawId>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect())
}

fn deserialize_descriptions<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<RawId, Option<String>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(id, desc)| desc.map(|d| (String::from(id), d)))
        .collect())
}

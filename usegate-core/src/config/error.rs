//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading, parsing, validating or writing the allowlist file.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Value validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// `proxy.backend_url` is not an absolute http(s) URL.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// An exempt path entry does not start with `/`.
    #[error("invalid exempt path '{path}': must start with '/'")]
    InvalidExemptPath { path: String },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// YAML rendering error.
    #[error("YAML serialize error: {0}")]
    SerializeError(String),

    /// I/O error reading or writing the config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The config path names a directory.
    #[error("configuration path is a directory: {}", path.display())]
    PathIsDirectory { path: PathBuf },

    /// Empty configuration file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// The same identifier appears more than once (canonical comparison).
    DuplicateUseCase { id: String },

    /// An identifier cannot be carried in a header or the bulk format.
    UnusableUseCase { id: String },

    /// A description refers to an identifier that is not allowed.
    OrphanDescription { id: String },

    /// The allowlist is empty while the header is required.
    EmptyAllowlist,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateUseCase { id } => {
                write!(f, "use case '{id}' is listed more than once")
            }
            Self::UnusableUseCase { id } => {
                write!(f, "use case '{id}' is not a valid identifier and is ignored")
            }
            Self::OrphanDescription { id } => {
                write!(f, "description for '{id}' has no matching use case")
            }
            Self::EmptyAllowlist => {
                write!(f, "allowlist is empty: every gated request will be rejected")
            }
        }
    }
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings encountered during validation.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a new validation result with warnings.
    pub fn with_warnings(warnings: Vec<ValidationWarning>) -> Self {
        Self { warnings }
    }

    /// Check if validation passed with no warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

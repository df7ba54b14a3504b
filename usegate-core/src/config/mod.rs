//! Allowlist file format: schema, defaults, loading and atomic writes.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod schema;

pub use defaults::{
    DEFAULT_BACKEND_URL, DEFAULT_CONFIG_FILE, DEFAULT_EXEMPT_PATHS, SEEDED_USE_CASES,
    StoreDefaults,
};
pub use error::{ConfigError, ValidationResult, ValidationWarning};
pub use loader::{
    load_and_validate, load_document, parse_document, render_document, resolve_config_path,
    validate, validate_backend_url, write_document,
};
pub use schema::{
    AccessControl, ConfigDocument, LoggingSection, ProxySection, SecuritySection,
};

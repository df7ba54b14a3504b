//! Configuration loading, validation and atomic persistence.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::defaults::DEFAULT_CONFIG_FILE;
use super::error::{ConfigError, ValidationResult, ValidationWarning};
use super::schema::ConfigDocument;
use crate::allowlist::{canonical, check_id};

/// Resolve the config file path.
///
/// Priority: explicit path (CLI flag), then `USEGATE_CONFIG`, then
/// `./config.yaml`. The file does not have to exist yet.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("USEGATE_CONFIG")
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Load the document from a file path.
pub fn load_document(path: &Path) -> Result<ConfigDocument, ConfigError> {
    if path.is_dir() {
        return Err(ConfigError::PathIsDirectory {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    parse_document(&contents)
}

/// Parse a document from YAML text.
pub fn parse_document(contents: &str) -> Result<ConfigDocument, ConfigError> {
    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }
    let document: ConfigDocument = serde_saphyr::from_str(contents)?;
    Ok(document)
}

/// Render a document as YAML.
pub fn render_document(document: &ConfigDocument) -> Result<String, ConfigError> {
    serde_saphyr::to_string(document).map_err(|e| ConfigError::SerializeError(e.to_string()))
}

/// Write a document to `path` atomically.
///
/// The YAML is written to a temporary file in the same directory, synced, and
/// renamed over the target. A reader never observes a partial file.
pub fn write_document(path: &Path, document: &ConfigDocument) -> Result<(), ConfigError> {
    let rendered = render_document(document)?;
    let dir = parent_dir(path);
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(rendered.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ConfigError::IoError(e.error))?;
    Ok(())
}

/// Directory containing `path`, or `.` for a bare file name.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Load and validate a document.
pub fn load_and_validate(path: &Path) -> Result<(ConfigDocument, ValidationResult), ConfigError> {
    let document = load_document(path)?;
    let result = validate(&document)?;
    Ok((document, result))
}

/// Validate a document.
///
/// Structural problems (an unusable backend URL, a relative exempt path) are
/// errors. Problems with individual identifiers are warnings because the
/// loader drops the offending entries and carries on.
pub fn validate(document: &ConfigDocument) -> Result<ValidationResult, ConfigError> {
    validate_backend_url(&document.proxy.backend_url)?;

    for path in &document.proxy.exempt_paths {
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidExemptPath { path: path.clone() });
        }
    }

    let case_sensitive = document.security.case_sensitive_matching;
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for id in &document.access_control.allowed_use_cases {
        let id_trimmed = id.trim();
        if check_id(id_trimmed).is_err() {
            warnings.push(ValidationWarning::UnusableUseCase { id: id.clone() });
            continue;
        }
        if !seen.insert(canonical(id_trimmed, case_sensitive)) {
            warnings.push(ValidationWarning::DuplicateUseCase { id: id.clone() });
        }
    }

    for id in document.access_control.use_case_descriptions.keys() {
        if !seen.contains(&canonical(id.trim(), case_sensitive)) {
            warnings.push(ValidationWarning::OrphanDescription { id: id.clone() });
        }
    }

    if seen.is_empty() && document.security.require_use_case_header {
        warnings.push(ValidationWarning::EmptyAllowlist);
    }

    Ok(ValidationResult::with_warnings(warnings))
}

/// Check that `url` is an absolute `http` or `https` URL.
pub fn validate_backend_url(url: &str) -> Result<(), ConfigError> {
    let uri: http::Uri = url.parse().map_err(|e: http::uri::InvalidUri| ConfigError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => {
            return Err(ConfigError::InvalidUrl {
                url: url.to_string(),
                message: "scheme must be http or https".to_string(),
            });
        }
    }

    if uri.authority().is_none() {
        return Err(ConfigError::InvalidUrl {
            url: url.to_string(),
            message: "missing host".to_string(),
        });
    }

    Ok(())
}

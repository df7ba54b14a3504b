//! Paths that bypass use-case evaluation.
//!
//! Entries are an explicit allowlist:
//!
//! - `/health` matches exactly `/health`
//! - `/docs/*` matches `/docs` and anything below `/docs/`, but not `/docsx`
//!
//! Anything else, including every backend route not listed, is evaluated.
//! So is any path with a `.` or `..` segment or an encoded separator, in raw
//! or percent-decoded form: `/docs/../api` names a backend route to anyone
//! who normalizes it.

/// One compiled exempt-path entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Exact(String),
    /// Prefix without the trailing `/*`.
    Prefix(String),
}

/// Compiled exempt-path list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExemptPaths {
    rules: Vec<Rule>,
}

impl ExemptPaths {
    /// Compile entries. Entries not starting with `/` are ignored; documents
    /// containing them fail validation and are never loaded.
    pub fn new(entries: &[String]) -> Self {
        let rules = entries
            .iter()
            .map(|entry| entry.trim())
            .filter(|entry| entry.starts_with('/'))
            .map(|entry| match entry.strip_suffix("/*") {
                Some(prefix) => Rule::Prefix(prefix.to_string()),
                None => Rule::Exact(entry.to_string()),
            })
            .collect();
        Self { rules }
    }

    /// Whether `path` (no query string) bypasses evaluation.
    pub fn matches(&self, path: &str) -> bool {
        if !is_normal_form(path) {
            return false;
        }
        self.rules.iter().any(|rule| match rule {
            Rule::Exact(exact) => path == exact,
            Rule::Prefix(prefix) => match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// No dot segments and no encoded separators, before or after decoding.
fn is_normal_form(path: &str) -> bool {
    let Ok(decoded) = urlencoding::decode(path) else {
        return false;
    };
    let dot_segment = decoded
        .split('/')
        .any(|segment| segment == "." || segment == "..");
    let encoded_slash = decoded.matches('/').count() != path.matches('/').count();
    !(dot_segment || encoded_slash || decoded.contains('\\'))
}

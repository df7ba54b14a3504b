//! Per-request policy evaluation.
//!
//! [`evaluate`] is a pure function of a snapshot and the request headers.
//! [`PolicyGate`] wraps it with exempt-path handling, audit logging and
//! metrics.

pub mod exempt;
pub mod gate;

use http::HeaderMap;
use serde::Serialize;

use crate::allowlist::AllowlistSnapshot;

pub use exempt::ExemptPaths;
pub use gate::{PolicyGate, RequestInfo, SnapshotProvider};

/// Header name in lower case, as stored by `http::HeaderMap`.
pub const USE_CASE_HEADER: &str = "x-use-case-id";

/// Header name as shown to clients.
pub const USE_CASE_HEADER_DISPLAY: &str = "X-Use-Case-ID";

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    MissingHeader,
    UnauthorizedValue,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::UnauthorizedValue => "unauthorized_value",
        }
    }

    /// HTTP status for the rejection response.
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingHeader => 400,
            Self::UnauthorizedValue => 403,
        }
    }
}

/// A refused request and what the client is told about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    /// Header value as received, when present.
    pub use_case_id: Option<String>,
    /// Allowed identifiers, when the snapshot permits disclosing them.
    pub allowed_use_cases: Option<Vec<String>>,
}

/// JSON body of a rejection response.
#[derive(Debug, Serialize)]
struct RejectionBody<'a> {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_case_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_use_cases: Option<&'a [String]>,
}

impl Rejection {
    pub fn status(&self) -> u16 {
        self.reason.status()
    }

    /// Human-readable `detail` string.
    pub fn detail(&self) -> String {
        match self.reason {
            RejectionReason::MissingHeader => {
                format!("Missing required header: {USE_CASE_HEADER_DISPLAY}")
            }
            RejectionReason::UnauthorizedValue => {
                let value = self.use_case_id.as_deref().unwrap_or_default();
                match &self.allowed_use_cases {
                    Some(allowed) => format!(
                        "Unauthorized use case: {value}. Allowed values: [{}]",
                        allowed
                            .iter()
                            .map(|id| format!("'{id}'"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    None => format!("Unauthorized use case: {value}"),
                }
            }
        }
    }

    /// Serialized response body.
    ///
    /// 400: `{"detail": ...}`. 403 adds `use_case_id` and, when disclosure is
    /// enabled, `allowed_use_cases`.
    pub fn to_json(&self) -> String {
        let unauthorized = self.reason == RejectionReason::UnauthorizedValue;
        let body = RejectionBody {
            detail: self.detail(),
            use_case_id: if unauthorized {
                Some(self.use_case_id.as_deref().unwrap_or_default())
            } else {
                None
            },
            allowed_use_cases: if unauthorized {
                self.allowed_use_cases.as_deref()
            } else {
                None
            },
        };
        // Serializing strings and string slices cannot fail.
        serde_json::to_string(&body).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward. `use_case_id` is `None` only when the header is not required
    /// and was not sent.
    Allow {
        use_case_id: Option<String>,
        description: Option<String>,
    },
    /// The path bypasses evaluation.
    Exempt,
    Reject(Rejection),
}

impl Decision {
    pub fn is_forwardable(&self) -> bool {
        !matches!(self, Self::Reject(_))
    }

    /// `(outcome, reason)` labels for metrics and audit lines.
    pub fn labels(&self) -> (&'static str, &'static str) {
        match self {
            Self::Allow {
                use_case_id: Some(_),
                ..
            } => ("allow", "allowlisted"),
            Self::Allow {
                use_case_id: None, ..
            } => ("allow", "header_not_required"),
            Self::Exempt => ("exempt", "exempt_path"),
            Self::Reject(rejection) => ("reject", rejection.reason.as_str()),
        }
    }
}

/// Extract the use-case header value.
///
/// The first occurrence wins. Surrounding whitespace is trimmed; an empty
/// value counts as absent. Non-UTF-8 bytes are replaced, so such a value can
/// never match an allowlisted identifier.
pub fn header_value(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(USE_CASE_HEADER)?;
    let value = match raw.to_str() {
        Ok(s) => s.trim().to_string(),
        Err(_) => String::from_utf8_lossy(raw.as_bytes()).trim().to_string(),
    };
    (!value.is_empty()).then_some(value)
}

/// Decide whether a request with `headers` may be forwarded.
///
/// Pure: no logging, no metrics. Exempt paths are handled by [`PolicyGate`].
pub fn evaluate(snapshot: &AllowlistSnapshot, headers: &HeaderMap) -> Decision {
    let security = snapshot.security();

    let Some(value) = header_value(headers) else {
        if security.require_use_case_header {
            return Decision::Reject(Rejection {
                reason: RejectionReason::MissingHeader,
                use_case_id: None,
                allowed_use_cases: None,
            });
        }
        return Decision::Allow {
            use_case_id: None,
            description: None,
        };
    };

    match snapshot.lookup(&value) {
        Some(record) => Decision::Allow {
            use_case_id: Some(value),
            description: record.description.clone(),
        },
        None => Decision::Reject(Rejection {
            reason: RejectionReason::UnauthorizedValue,
            use_case_id: Some(value),
            allowed_use_cases: security
                .expose_allowed_use_cases
                .then(|| snapshot.ids()),
        }),
    }
}

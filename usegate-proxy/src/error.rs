//! Error types for the forwarding layer.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use thiserror::Error;

/// Errors that can occur while forwarding a request to the backend.
///
/// Every variant maps to a JSON `{"detail": ...}` response. None is retried.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The request cannot be turned into a backend URI (maps to 400).
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Connection error to the backend (maps to 502 Bad Gateway).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection refused by the backend (maps to 502 Bad Gateway).
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Connect or response timeout (maps to 504 Gateway Timeout).
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl ProxyError {
    /// Metric label for this failure.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Connection(_) | ProxyError::ConnectionRefused(_) => "connection",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::InvalidUri(_) => "invalid_uri",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ConnectionRefused(_) | ProxyError::Connection(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidUri(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Convert error to a JSON response with the matching status code.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let detail = match self {
            ProxyError::ConnectionRefused(msg) | ProxyError::Connection(msg) => {
                format!("Backend service unavailable: {msg}")
            }
            ProxyError::Timeout(msg) => format!("Backend service timed out: {msg}"),
            ProxyError::InvalidUri(msg) => format!("Invalid request URI: {msg}"),
        };

        json_response(self.status(), &serde_json::json!({ "detail": detail }).to_string())
    }
}

/// Build a JSON response, falling back to a bare 500 if the builder rejects
/// the parts.
pub fn json_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::copy_from_slice(body.as_bytes())))
        .unwrap_or_else(|_| {
            let mut resp = Response::new(Full::new(Bytes::from_static(
                b"{\"detail\":\"Internal server error\"}",
            )));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        })
}

/// Result type alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

//! The gate: snapshot fetch, evaluation, audit line and metrics for one
//! request.

use http::{HeaderMap, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Decision, evaluate, header_value};
use crate::allowlist::AllowlistSnapshot;
use crate::metrics::GateMetrics;

/// Source of the current allowlist snapshot.
///
/// The gate only reads snapshots; it never mutates the store behind them.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> Arc<AllowlistSnapshot>;
}

/// A fixed snapshot.
impl SnapshotProvider for AllowlistSnapshot {
    fn snapshot(&self) -> Arc<AllowlistSnapshot> {
        Arc::new(self.clone())
    }
}

/// The parts of a request the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    /// Path without the query string.
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub peer: Option<SocketAddr>,
}

impl RequestInfo<'_> {
    /// Caller attribution for audit lines: the first `X-Forwarded-For` entry,
    /// else the peer address.
    pub fn caller(&self) -> String {
        let forwarded = self
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match (forwarded, self.peer) {
            (Some(addr), _) => addr.to_string(),
            (None, Some(peer)) => peer.ip().to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Per-request policy gate.
#[derive(Clone)]
pub struct PolicyGate {
    source: Arc<dyn SnapshotProvider>,
    metrics: Option<Arc<GateMetrics>>,
}

impl PolicyGate {
    pub fn new(source: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            source,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current snapshot from the provider.
    pub fn snapshot(&self) -> Arc<AllowlistSnapshot> {
        self.source.snapshot()
    }

    /// Evaluate headers against the current snapshot. No audit, no metrics.
    pub fn evaluate(&self, headers: &HeaderMap) -> Decision {
        evaluate(&self.snapshot(), headers)
    }

    /// Full per-request check.
    ///
    /// Takes one snapshot for the whole decision, so a concurrent reload
    /// cannot mix old and new policy within one request. Every non-exempt
    /// decision produces exactly one audit line.
    pub fn check(&self, request: &RequestInfo<'_>) -> Decision {
        let snapshot = self.snapshot();

        if snapshot.exempt_paths().matches(request.path) {
            debug!(method = %request.method, path = request.path, "Exempt path, skipping use case check");
            self.record(&Decision::Exempt);
            return Decision::Exempt;
        }

        let decision = evaluate(&snapshot, request.headers);
        self.audit(&snapshot, request, &decision);
        self.record(&decision);
        decision
    }

    fn audit(&self, snapshot: &AllowlistSnapshot, request: &RequestInfo<'_>, decision: &Decision) {
        let caller = request.caller();
        let (outcome, reason) = decision.labels();
        let raw_value = header_value(request.headers);
        let use_case_id = raw_value.as_deref().unwrap_or("missing");

        match decision {
            Decision::Allow { description, .. } => {
                info!(
                    target: "usegate::audit",
                    outcome,
                    reason,
                    use_case_id,
                    description = description.as_deref().unwrap_or(""),
                    caller = %caller,
                    method = %request.method,
                    path = request.path,
                    "Use case authorized"
                );
            }
            Decision::Reject(_) if snapshot.security().log_rejected_requests => {
                warn!(
                    target: "usegate::audit",
                    outcome,
                    reason,
                    use_case_id,
                    caller = %caller,
                    method = %request.method,
                    path = request.path,
                    "Use case rejected"
                );
            }
            Decision::Reject(_) => {
                info!(
                    target: "usegate::audit",
                    outcome,
                    reason,
                    use_case_id,
                    caller = %caller,
                    method = %request.method,
                    path = request.path,
                    "Use case rejected"
                );
            }
            Decision::Exempt => {}
        }
    }

    fn record(&self, decision: &Decision) {
        if let Some(metrics) = &self.metrics {
            let (outcome, reason) = decision.labels();
            metrics.record_decision(outcome, reason);
        }
    }
}

impl std::fmt::Debug for PolicyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyGate")
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

//! Prometheus metrics using the prometheus-client crate.
//!
//! [`GateMetrics`] registers every series the gate exports. The proxy encodes
//! the registry in OpenMetrics text format on `GET /metrics`.
//!
//! Counter names are registered without the `_total` suffix; the encoder
//! appends it.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Upstream latency buckets in seconds.
const UPSTREAM_DURATION_BUCKETS: [f64; 10] =
    [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0];

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Labels for gate decision counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    /// "allow", "reject" or "exempt"
    pub outcome: String,
    /// "missing_header", "unauthorized_value", "allowlisted", "exempt_path"
    /// or "header_not_required"
    pub reason: String,
}

/// Labels for reload counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReloadLabels {
    /// "success" or "failure"
    pub result: String,
}

/// Labels for forwarding failures.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamErrorLabels {
    /// "connection", "timeout" or "other"
    pub kind: String,
}

/// Labels for upstream duration histograms.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamLabels {
    /// HTTP status class of the backend response ("2xx", "5xx", ...)
    pub status_class: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// All gate metrics.
#[derive(Debug, Clone)]
pub struct GateMetrics {
    pub decisions_total: Family<DecisionLabels, Counter>,
    pub reloads_total: Family<ReloadLabels, Counter>,
    pub upstream_errors_total: Family<UpstreamErrorLabels, Counter>,
    pub upstream_duration_seconds: Family<UpstreamLabels, Histogram>,
    /// Number of identifiers in the published snapshot.
    pub allowlist_size: Gauge,
}

impl GateMetrics {
    /// Create and register all metrics with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let decisions_total = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "usegate_decisions",
            "Gate decisions by outcome and reason",
            decisions_total.clone(),
        );

        let reloads_total = Family::<ReloadLabels, Counter>::default();
        registry.register(
            "usegate_reloads",
            "Allowlist reloads by result",
            reloads_total.clone(),
        );

        let upstream_errors_total = Family::<UpstreamErrorLabels, Counter>::default();
        registry.register(
            "usegate_upstream_errors",
            "Forwarding failures by kind",
            upstream_errors_total.clone(),
        );

        let upstream_duration_seconds =
            Family::<UpstreamLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(UPSTREAM_DURATION_BUCKETS.iter().copied())
            });
        registry.register(
            "usegate_upstream_duration_seconds",
            "Time until the backend returned response headers",
            upstream_duration_seconds.clone(),
        );

        let allowlist_size = Gauge::default();
        registry.register(
            "usegate_allowlist_size",
            "Identifiers in the current allowlist snapshot",
            allowlist_size.clone(),
        );

        Self {
            decisions_total,
            reloads_total,
            upstream_errors_total,
            upstream_duration_seconds,
            allowlist_size,
        }
    }

    pub fn record_decision(&self, outcome: &str, reason: &str) {
        self.decisions_total
            .get_or_create(&DecisionLabels {
                outcome: outcome.to_string(),
                reason: reason.to_string(),
            })
            .inc();
    }

    pub fn record_reload(&self, result: &str) {
        self.reloads_total
            .get_or_create(&ReloadLabels {
                result: result.to_string(),
            })
            .inc();
    }

    pub fn record_upstream_error(&self, kind: &str) {
        self.upstream_errors_total
            .get_or_create(&UpstreamErrorLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Record the time to response headers for one forwarded request.
    pub fn record_upstream_duration(&self, status: u16, duration_secs: f64) {
        self.upstream_duration_seconds
            .get_or_create(&UpstreamLabels {
                status_class: format!("{}xx", status / 100),
            })
            .observe(duration_secs);
    }

    pub fn set_allowlist_size(&self, size: usize) {
        self.allowlist_size.set(i64::try_from(size).unwrap_or(i64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(registry: &Registry) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, registry)
            .expect("encoding should succeed");
        buffer
    }

    #[test]
    fn test_metrics_registration() {
        let mut registry = Registry::default();
        let metrics = GateMetrics::new(&mut registry);

        metrics.record_decision("reject", "missing_header");
        metrics.record_decision("allow", "allowlisted");
        metrics.record_reload("success");
        metrics.record_upstream_error("timeout");
        metrics.set_allowlist_size(5);

        let buffer = encode(&registry);
        assert!(buffer.contains(
            "usegate_decisions_total{outcome=\"reject\",reason=\"missing_header\"} 1"
        ));
        assert!(buffer.contains("usegate_reloads_total{result=\"success\"} 1"));
        assert!(buffer.contains("usegate_upstream_errors_total{kind=\"timeout\"} 1"));
        assert!(buffer.contains("usegate_allowlist_size 5"));
    }

    #[test]
    fn test_upstream_duration_buckets() {
        let mut registry = Registry::default();
        let metrics = GateMetrics::new(&mut registry);

        metrics.record_upstream_duration(200, 0.02);
        metrics.record_upstream_duration(503, 2.0);

        let buffer = encode(&registry);
        assert!(buffer.contains("usegate_upstream_duration_seconds_bucket"));
        assert!(buffer.contains("status_class=\"2xx\""));
        assert!(buffer.contains("status_class=\"5xx\""));
    }
}

//! Prometheus metric registry for the guard pipeline.
//!
//! Metric names and bucket layouts are part of the external contract; any
//! observability collaborator scrapes these exact series:
//!
//! | Metric | Kind | Labels |
//! |---|---|---|
//! | `egress_guard_latency_seconds` | histogram | - |
//! | `egress_guard_detector_latency_seconds` | histogram | `detector` |
//! | `egress_guard_rule_hits_total` | counter | `rule_id` |
//! | `egress_guard_blocked_total` | counter | - |
//! | `egress_guard_rule_severity_total` | counter | `severity` |
//! | `egress_guard_context_type_total` | counter | `type` |
//! | `egress_guard_explain_only_total` | counter | - |
//! | `egress_guard_ml_preclf_load_total` | counter | `status` |
//! | `egress_guard_ml_preclf_shadow_total` | counter | `ml_pred`, `heuristic`, `final` |

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::LazyLock;

static METRICS: LazyLock<GuardMetrics> = LazyLock::new(GuardMetrics::new);

/// The process-wide metric handles.
pub struct GuardMetrics {
    registry: Registry,
    guard_latency: Histogram,
    detector_latency: HistogramVec,
    rule_hits: IntCounterVec,
    blocked_total: IntCounter,
    rule_severity: IntCounterVec,
    context_type: IntCounterVec,
    explain_only: IntCounter,
    ml_preclf_load: IntCounterVec,
    ml_preclf_shadow: IntCounterVec,
}

impl GuardMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let guard_latency = Histogram::with_opts(
            HistogramOpts::new(
                "egress_guard_latency_seconds",
                "Latency of guard pipeline executions",
            )
            .buckets(vec![0.005, 0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28]),
        )
        .expect("valid histogram opts");

        let detector_latency = HistogramVec::new(
            HistogramOpts::new(
                "egress_guard_detector_latency_seconds",
                "Latency of individual detector executions",
            )
            .buckets(vec![0.001, 0.003, 0.005, 0.01, 0.02, 0.04, 0.08, 0.16]),
            &["detector"],
        )
        .expect("valid histogram opts");

        let rule_hits = IntCounterVec::new(
            Opts::new("egress_guard_rule_hits_total", "Number of times each rule fired"),
            &["rule_id"],
        )
        .expect("valid counter opts");

        let blocked_total = IntCounter::new(
            "egress_guard_blocked_total",
            "Number of responses blocked",
        )
        .expect("valid counter opts");

        let rule_severity = IntCounterVec::new(
            Opts::new(
                "egress_guard_rule_severity_total",
                "Number of rule hits grouped by severity",
            ),
            &["severity"],
        )
        .expect("valid counter opts");

        let context_type = IntCounterVec::new(
            Opts::new(
                "egress_guard_context_type_total",
                "Count of segments by type (text, code, link)",
            ),
            &["type"],
        )
        .expect("valid counter opts");

        let explain_only = IntCounter::new(
            "egress_guard_explain_only_total",
            "Count of explain-only (educational) segments detected",
        )
        .expect("valid counter opts");

        let ml_preclf_load = IntCounterVec::new(
            Opts::new(
                "egress_guard_ml_preclf_load_total",
                "Count of ML pre-classifier load attempts",
            ),
            &["status"],
        )
        .expect("valid counter opts");

        let ml_preclf_shadow = IntCounterVec::new(
            Opts::new(
                "egress_guard_ml_preclf_shadow_total",
                "Count of ML vs heuristic disagreements in shadow mode",
            ),
            &["ml_pred", "heuristic", "final"],
        )
        .expect("valid counter opts");

        for collector in [
            Box::new(guard_latency.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(detector_latency.clone()),
            Box::new(rule_hits.clone()),
            Box::new(blocked_total.clone()),
            Box::new(rule_severity.clone()),
            Box::new(context_type.clone()),
            Box::new(explain_only.clone()),
            Box::new(ml_preclf_load.clone()),
            Box::new(ml_preclf_shadow.clone()),
        ] {
            registry.register(collector).expect("unique metric names");
        }

        Self {
            registry,
            guard_latency,
            detector_latency,
            rule_hits,
            blocked_total,
            rule_severity,
            context_type,
            explain_only,
            ml_preclf_load,
            ml_preclf_shadow,
        }
    }

    /// Record one full pipeline run.
    pub fn observe_guard_run<'a>(
        &self,
        latency_ms: f64,
        rule_ids: impl IntoIterator<Item = &'a str>,
        blocked: bool,
    ) {
        self.guard_latency.observe(latency_ms / 1000.0);
        if blocked {
            self.blocked_total.inc();
        }
        for rule_id in rule_ids {
            self.rule_hits.with_label_values(&[rule_id]).inc();
        }
    }

    /// Record one detector step.
    pub fn observe_detector<'a>(
        &self,
        detector: &str,
        latency_ms: f64,
        severities: impl IntoIterator<Item = &'a str>,
    ) {
        self.detector_latency
            .with_label_values(&[detector])
            .observe(latency_ms / 1000.0);
        for severity in severities {
            let key = if severity.is_empty() { "unknown" } else { severity };
            self.rule_severity.with_label_values(&[key]).inc();
        }
    }

    /// Record parsed segments as `(segment type, explain_only)` pairs.
    pub fn observe_context<'a>(&self, segments: impl IntoIterator<Item = (&'a str, bool)>) {
        for (segment_type, explain_only) in segments {
            self.context_type.with_label_values(&[segment_type]).inc();
            if explain_only {
                self.explain_only.inc();
            }
        }
    }

    /// Track an ML pre-classifier load attempt (`ok` / `fail` / `disabled`).
    pub fn observe_ml_preclf_load(&self, status: &str) {
        self.ml_preclf_load.with_label_values(&[status]).inc();
    }

    /// Track a shadow-mode comparison between ML and heuristic.
    pub fn observe_ml_shadow(&self, ml_pred: &str, heuristic: &str, final_value: &str) {
        self.ml_preclf_shadow
            .with_label_values(&[ml_pred, heuristic, final_value])
            .inc();
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<(String, &'static str), prometheus::Error> {
        let encoder = TextEncoder::new();
        let body = encoder.encode_to_string(&self.registry.gather())?;
        Ok((body, "text/plain; version=0.0.4"))
    }
}

/// The process-wide metrics instance.
pub fn metrics() -> &'static GuardMetrics {
    &METRICS
}

//! Pipeline orchestration: wire normalizer, parser, detectors, evaluator,
//! and action applier together for one request.
//!
//! Stage order per request: normalize -> load pre-classifier -> parse ->
//! load policy (fail-closed) -> run detectors with short-circuit ->
//! optional ML validation of PII findings -> annotate context -> evaluate
//! -> apply actions -> record metrics and SIEM events.
//!
//! Findings preserve detector order and within-detector match order, and
//! the first blocking finding stops the remaining detectors from running
//! at all.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actions::apply_actions;
use crate::error::GuardError;
use crate::normalize::normalize_text;
use crate::parser::{parse_content, ParseOptions, ParsedContent};
use crate::preclassifier::load_preclassifier;
use crate::settings::Settings;
use crate::validator::{filter_pii_findings, PassthroughValidator};
use guard_detectors::scan_all;
use guard_policy::{evaluate, load_policy, load_safe_messages, Finding, SafeMessageCatalog};
use guard_telemetry::{metrics, siem};

/// One response to guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardRequest {
    /// The model's outbound response text.
    pub response: String,

    /// Policy to evaluate against; unknown IDs fall back to `default`.
    #[serde(default = "default_policy_id")]
    pub policy_id: String,

    /// Caller-supplied context: `tenant`, `request_id`, and free-form keys.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_policy_id() -> String {
    "default".to_string()
}

impl GuardRequest {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            policy_id: default_policy_id(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = policy_id.into();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    fn tenant(&self) -> Option<String> {
        self.metadata.get("tenant").and_then(value_as_string)
    }

    fn request_id(&self) -> Option<String> {
        self.metadata.get("request_id").and_then(value_as_string)
    }
}

fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// The guarded response returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Sanitized (or safe-message) response text.
    pub response: String,

    /// Findings observed before any short-circuit.
    pub findings: Vec<Finding>,

    pub blocked: bool,

    /// Aggregate risk, `0..=100`.
    pub risk_score: i64,

    pub policy_id: String,

    pub latency_ms: f64,

    /// Guard version string from settings.
    pub version: String,
}

/// Execute the guard pipeline for a single response.
///
/// # Errors
///
/// - [`GuardError::RequestTooLarge`] when the body exceeds the admission
///   limit.
/// - [`GuardError::Policy`] when the policy document cannot be loaded -
///   the pipeline is fail-closed on policy.
pub fn run_pipeline(request: &GuardRequest, settings: &Settings) -> Result<PipelineResult, GuardError> {
    let started = Instant::now();
    info!(policy_id = %request.policy_id, "pipeline start");

    if !settings.admits(request.response.len()) {
        return Err(GuardError::RequestTooLarge {
            size: request.response.len(),
            max: settings.max_request_size_bytes,
        });
    }

    // Stage 1: normalization
    let normalized = normalize_text(&request.response, settings.max_unescape);

    // Stage 2: optional ML pre-classifier
    let preclassifier = load_preclassifier(settings);

    // Stage 3: context parsing
    let parsed = if settings.feature_context_parsing {
        let options = ParseOptions {
            detect_explain_only: true,
            preclassifier: preclassifier.as_classifier(),
            shadow_mode: settings.shadow_mode,
        };
        parse_content(&normalized.text, request.metadata.clone(), &options)
    } else {
        ParsedContent::plain(normalized.text.clone(), request.metadata.clone())
    };

    // Stage 4: policy selection (fail-closed)
    let store = load_policy(&settings.policy_file)?;
    let policy = store.select(&request.policy_id);
    let tenant = request.tenant();

    // Stage 5: detectors, short-circuiting on the first blocking finding
    let mut findings: Vec<Finding> = Vec::new();
    for report in scan_all(&parsed.text, policy, tenant.as_deref()) {
        let severities: Vec<&str> = report
            .findings
            .iter()
            .filter_map(|f| policy.rule(&f.rule_id).map(|r| r.severity.as_str()))
            .collect();
        metrics().observe_detector(report.detector, report.latency_ms, severities);

        let stop = report.has_blocking_finding();
        findings.extend(report.findings);
        if stop {
            debug!(detector = report.detector, "short-circuit on blocking finding");
            break;
        }
    }

    // Stage 6: optional ML validation of PII findings
    if settings.feature_ml_validator {
        findings = filter_pii_findings(findings, &parsed.text, &PassthroughValidator);
    }

    // Stage 7: context annotation from the segment tree
    for finding in &mut findings {
        if let Some((start, end)) = finding.span() {
            let (kind, explain_only) = parsed.context_for_span(start, end);
            finding.context = kind.into();
            finding.explain_only = explain_only;
        }
    }
    metrics().observe_context(parsed.segments.iter().map(|s| (s.kind.as_str(), s.explain_only)));

    // Stage 8: policy evaluation
    let decision = evaluate(policy, &findings, settings.allow_explain_only_bypass);

    // Stage 9: action application
    let safe_messages = match load_safe_messages(&settings.safe_messages_file) {
        Ok(catalog) => catalog,
        Err(err) => {
            warn!(%err, "safe-message catalog unavailable; using built-in default");
            std::sync::Arc::new(SafeMessageCatalog::default())
        }
    };
    let output = apply_actions(&parsed.text, &findings, &decision, &safe_messages);

    // Stage 10: telemetry
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    metrics().observe_guard_run(
        latency_ms,
        findings.iter().map(|f| f.rule_id.as_str()),
        decision.blocked,
    );
    emit_siem_events(request, policy, &findings, &decision);

    info!(
        policy_id = %request.policy_id,
        blocked = decision.blocked,
        findings = findings.len(),
        risk_score = decision.risk_score,
        latency_ms,
        "pipeline end"
    );

    Ok(PipelineResult {
        response: output,
        findings,
        blocked: decision.blocked,
        risk_score: decision.risk_score,
        policy_id: request.policy_id.clone(),
        latency_ms,
        version: settings.model_version.clone(),
    })
}

fn emit_siem_events(
    request: &GuardRequest,
    policy: &guard_policy::PolicyDefinition,
    findings: &[Finding],
    decision: &guard_policy::PolicyDecision,
) {
    let manager = siem::global();
    for finding in findings {
        let severity = policy
            .rule(&finding.rule_id)
            .map(|r| r.severity.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let event = siem::SiemEvent::finding(
            finding.rule_id.clone(),
            finding.action.as_str(),
            severity,
            request.request_id(),
            request.tenant(),
            decision.risk_score,
            finding.detail_str("snippet_hash").map(str::to_string),
            decision.blocked,
        );
        if !manager.enqueue(event) {
            warn!(rule_id = %finding.rule_id, "siem queue full; finding event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_to_the_default_policy() {
        let request = GuardRequest::new("hello");
        assert_eq!(request.policy_id, "default");
        assert!(request.metadata.is_empty());
    }

    #[test]
    fn request_deserializes_from_the_wire_shape() {
        let json = r#"{"response": "hi", "metadata": {"tenant": "acme"}}"#;
        let request: GuardRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.policy_id, "default");
        assert_eq!(request.tenant().as_deref(), Some("acme"));
    }

    #[test]
    fn non_string_tenant_is_stringified() {
        let request = GuardRequest::new("hi").with_metadata("tenant", 42);
        assert_eq!(request.tenant().as_deref(), Some("42"));
    }

    #[test]
    fn oversized_request_is_rejected_before_any_work() {
        let settings = Settings {
            max_request_size_bytes: 4,
            ..Settings::default()
        };
        let request = GuardRequest::new("too large");
        let err = run_pipeline(&request, &settings).unwrap_err();
        assert!(matches!(err, GuardError::RequestTooLarge { size: 9, max: 4 }));
    }

    #[test]
    fn result_serializes_with_wire_field_names() {
        let result = PipelineResult {
            response: "ok".to_string(),
            findings: Vec::new(),
            blocked: false,
            risk_score: 0,
            policy_id: "default".to_string(),
            latency_ms: 1.5,
            version: "0.1.0".to_string(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["response"], "ok");
        assert_eq!(value["blocked"], false);
        assert_eq!(value["risk_score"], 0);
        assert_eq!(value["policy_id"], "default");
    }
}

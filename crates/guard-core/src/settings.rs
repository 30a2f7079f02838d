//! Environment-driven configuration with sensible defaults.
//!
//! Settings are an immutable per-request snapshot: the pipeline reads one
//! `Settings` value and never consults the environment mid-run. The DoS
//! guard values (`max_concurrent_guard_requests`, `max_request_size_bytes`,
//! `request_timeout_seconds`) are enforced by the transport; the core
//! advertises them and checks only the body size itself.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Immutable configuration snapshot for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Policy document path.
    pub policy_file: PathBuf,

    /// Safe-message catalog path.
    pub safe_messages_file: PathBuf,

    /// Log level handed to the subscriber by the binary.
    pub log_level: String,

    /// Version string reported in every `PipelineResult`.
    pub model_version: String,

    /// Whether the metrics endpoint should be exposed.
    pub metrics_enabled: bool,

    /// Load the ML pre-classifier for explain-only classification.
    pub feature_ml_preclf: bool,

    /// Post-filter PII findings through the ML validator.
    pub feature_ml_validator: bool,

    /// Segment responses into text/code/link regions.
    pub feature_context_parsing: bool,

    /// Record ML-vs-heuristic disagreements without changing decisions.
    pub shadow_mode: bool,

    /// Tenant opt-in: explain-only findings may bypass blocking.
    pub allow_explain_only_bypass: bool,

    /// Transport worker-pool bound, advertised to the transport.
    pub max_concurrent_guard_requests: usize,

    /// Admission limit on the request body, in bytes.
    pub max_request_size_bytes: usize,

    /// Per-request deadline, enforced by the transport.
    pub request_timeout_seconds: u64,

    /// ML pre-classifier artifact path.
    pub preclf_model_path: PathBuf,

    /// Companion manifest with the artifact's sha256 and size.
    pub preclf_manifest_path: PathBuf,

    /// Directory the artifact must resolve strictly beneath.
    pub trusted_model_dir: PathBuf,

    /// Verify artifact hash and size against the manifest before loading.
    pub enforce_model_integrity: bool,

    /// HTML entity budget for the normalizer.
    pub max_unescape: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            policy_file: PathBuf::from("config/policy.yaml"),
            safe_messages_file: PathBuf::from("config/safe_messages.yaml"),
            log_level: "info".to_string(),
            model_version: "0.1.0".to_string(),
            metrics_enabled: true,
            feature_ml_preclf: true,
            feature_ml_validator: false,
            feature_context_parsing: true,
            shadow_mode: false,
            allow_explain_only_bypass: false,
            max_concurrent_guard_requests: 8,
            max_request_size_bytes: 1_048_576, // 1 MiB
            request_timeout_seconds: 10,
            preclf_model_path: PathBuf::from("models/preclf_v1.json"),
            preclf_manifest_path: PathBuf::from("models/preclf_v1.manifest.json"),
            trusted_model_dir: PathBuf::from("models"),
            enforce_model_integrity: true,
            max_unescape: 1000,
        }
    }
}

impl Settings {
    /// Read settings from the environment, with `.env` support.
    ///
    /// Unset or unparseable variables fall back to their defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        Self {
            policy_file: env_path("POLICY_FILE", defaults.policy_file),
            safe_messages_file: env_path("SAFE_MESSAGES_FILE", defaults.safe_messages_file),
            log_level: env_string("LOG_LEVEL", defaults.log_level),
            model_version: env_string("MODEL_VERSION", defaults.model_version),
            metrics_enabled: env_bool("METRICS_ENABLED", defaults.metrics_enabled),
            feature_ml_preclf: env_bool("FEATURE_ML_PRECLF", defaults.feature_ml_preclf),
            feature_ml_validator: env_bool("FEATURE_ML_VALIDATOR", defaults.feature_ml_validator),
            feature_context_parsing: env_bool(
                "FEATURE_CONTEXT_PARSING",
                defaults.feature_context_parsing,
            ),
            shadow_mode: env_bool("SHADOW_MODE", defaults.shadow_mode),
            allow_explain_only_bypass: env_bool(
                "ALLOW_EXPLAIN_ONLY_BYPASS",
                defaults.allow_explain_only_bypass,
            ),
            max_concurrent_guard_requests: env_parse(
                "MAX_CONCURRENT_GUARD_REQUESTS",
                defaults.max_concurrent_guard_requests,
            ),
            max_request_size_bytes: env_parse(
                "MAX_REQUEST_SIZE_BYTES",
                defaults.max_request_size_bytes,
            ),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            preclf_model_path: env_path("PRECLF_MODEL_PATH", defaults.preclf_model_path),
            preclf_manifest_path: env_path("PRECLF_MANIFEST_PATH", defaults.preclf_manifest_path),
            trusted_model_dir: env_path("TRUSTED_MODEL_DIR", defaults.trusted_model_dir),
            enforce_model_integrity: env_bool(
                "ENFORCE_MODEL_INTEGRITY",
                defaults.enforce_model_integrity,
            ),
            max_unescape: env_parse("MAX_UNESCAPE", defaults.max_unescape),
        }
    }

    /// Admission check the transport applies before any pipeline work.
    pub fn admits(&self, body_len: usize) -> bool {
        body_len <= self.max_request_size_bytes
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var_os(key).map(PathBuf::from).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

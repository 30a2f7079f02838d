//! Lightweight pre-classifier with optional, integrity-checked model
//! loading.
//!
//! Two implementations sit behind the [`PreClassifier`] seam:
//!
//! - [`HeuristicPreClassifier`] - keyword spotting, always available.
//! - [`KeywordModel`] - a JSON artifact of per-label keyword weights,
//!   loaded from disk only after integrity checks.
//!
//! ## Artifact Trust
//!
//! The model loader refuses anything outside the trusted directory and,
//! when integrity enforcement is on, anything whose SHA-256 digest or byte
//! length disagrees with the companion manifest. Every failure downgrades
//! to the heuristic with a recorded reason and a
//! `ml_preclf_load_total{status="fail"}` metric - loading never takes the
//! guard down.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::settings::Settings;
use guard_telemetry::metrics;

/// Keywords that push the heuristic towards `command`.
const COMMAND_KEYWORDS: [&str; 7] = [
    "curl", "wget", "powershell", "kubectl", "select", "insert", "delete",
];

/// Label classification seam used by the parser's explain-only logic.
pub trait PreClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Classify a code snippet into a label such as `command`,
    /// `educational`, or `text`.
    fn predict(&self, text: &str) -> Result<String, PreClassifyError>;
}

/// A classifier that cannot produce a label; callers fall back to the
/// heuristic.
#[derive(Debug, Error)]
#[error("pre-classifier failure: {0}")]
pub struct PreClassifyError(pub String);

/// Keyword-spotting fallback classifier.
#[derive(Debug, Clone, Default)]
pub struct HeuristicPreClassifier;

impl PreClassifier for HeuristicPreClassifier {
    fn name(&self) -> &str {
        "heuristic-v0"
    }

    fn predict(&self, text: &str) -> Result<String, PreClassifyError> {
        let lowered = text.to_lowercase();
        if COMMAND_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            return Ok("command".to_string());
        }
        Ok("text".to_string())
    }
}

/// The JSON model artifact: per-label keyword lists with a default label
/// when nothing scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordModel {
    pub name: String,
    /// label -> keywords voting for that label.
    pub keywords: HashMap<String, Vec<String>>,
    /// Returned when no keyword hits.
    pub default_label: String,
}

impl PreClassifier for KeywordModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, text: &str) -> Result<String, PreClassifyError> {
        let lowered = text.to_lowercase();
        let mut best: Option<(&str, usize)> = None;
        for (label, keywords) in &self.keywords {
            let hits = keywords.iter().filter(|k| lowered.contains(k.as_str())).count();
            if hits > 0 && best.is_none_or(|(_, best_hits)| hits > best_hits) {
                best = Some((label, hits));
            }
        }
        Ok(best
            .map(|(label, _)| label.to_string())
            .unwrap_or_else(|| self.default_label.clone()))
    }
}

/// Companion manifest pinning the artifact bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Lowercase hex SHA-256 of the artifact file.
    pub sha256: String,
    /// Exact artifact size in bytes.
    pub size_bytes: u64,
}

/// Why an artifact was refused.
#[derive(Debug, Error)]
pub enum MlArtifactError {
    #[error("model path escapes the trusted directory: {0}")]
    UntrustedPath(String),

    #[error("model artifact not found: {0}")]
    NotFound(String),

    #[error("manifest unreadable: {0}")]
    Manifest(String),

    #[error("artifact size mismatch: manifest {expected} bytes, file {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("artifact hash mismatch")]
    HashMismatch,

    #[error("artifact unparseable: {0}")]
    Parse(String),
}

/// Loader outcome: the model, the heuristic (with the downgrade reason),
/// or nothing at all when the feature is off.
pub enum LoadedPreClassifier {
    Model(KeywordModel),
    Heuristic {
        classifier: HeuristicPreClassifier,
        reason: Option<String>,
    },
    Disabled,
}

impl LoadedPreClassifier {
    /// The classifier to hand to the parser, if any.
    pub fn as_classifier(&self) -> Option<&dyn PreClassifier> {
        match self {
            LoadedPreClassifier::Model(model) => Some(model),
            LoadedPreClassifier::Heuristic { classifier, .. } => Some(classifier),
            LoadedPreClassifier::Disabled => None,
        }
    }

    /// The downgrade reason, when the heuristic replaced a failed load.
    pub fn downgrade_reason(&self) -> Option<&str> {
        match self {
            LoadedPreClassifier::Heuristic { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

/// Load the pre-classifier according to `settings`.
///
/// Never fails: every artifact problem downgrades to the heuristic with a
/// reason, and the load metric records `ok` or `fail`.
pub fn load_preclassifier(settings: &Settings) -> LoadedPreClassifier {
    if !settings.feature_ml_preclf {
        return LoadedPreClassifier::Disabled;
    }

    match try_load_model(settings) {
        Ok(model) => {
            info!(model = %model.name, "pre-classifier model loaded");
            metrics().observe_ml_preclf_load("ok");
            LoadedPreClassifier::Model(model)
        }
        Err(err) => {
            warn!(%err, "pre-classifier load failed; falling back to heuristic");
            metrics().observe_ml_preclf_load("fail");
            LoadedPreClassifier::Heuristic {
                classifier: HeuristicPreClassifier,
                reason: Some(err.to_string()),
            }
        }
    }
}

fn try_load_model(settings: &Settings) -> Result<KeywordModel, MlArtifactError> {
    let model_path = &settings.preclf_model_path;

    let resolved = model_path
        .canonicalize()
        .map_err(|_| MlArtifactError::NotFound(model_path.display().to_string()))?;

    let trusted = settings
        .trusted_model_dir
        .canonicalize()
        .map_err(|_| MlArtifactError::UntrustedPath(settings.trusted_model_dir.display().to_string()))?;

    // Strictly beneath the trusted directory - the directory itself is not
    // a valid artifact path.
    if !resolved.starts_with(&trusted) || resolved == trusted {
        return Err(MlArtifactError::UntrustedPath(resolved.display().to_string()));
    }

    let bytes = std::fs::read(&resolved)
        .map_err(|e| MlArtifactError::NotFound(format!("{}: {e}", resolved.display())))?;

    if settings.enforce_model_integrity {
        verify_integrity(&bytes, &settings.preclf_manifest_path)?;
    }

    serde_json::from_slice(&bytes).map_err(|e| MlArtifactError::Parse(e.to_string()))
}

fn verify_integrity(bytes: &[u8], manifest_path: &Path) -> Result<(), MlArtifactError> {
    let manifest_raw = std::fs::read_to_string(manifest_path)
        .map_err(|e| MlArtifactError::Manifest(format!("{}: {e}", manifest_path.display())))?;
    let manifest: ModelManifest =
        serde_json::from_str(&manifest_raw).map_err(|e| MlArtifactError::Manifest(e.to_string()))?;

    if bytes.len() as u64 != manifest.size_bytes {
        return Err(MlArtifactError::SizeMismatch {
            expected: manifest.size_bytes,
            actual: bytes.len() as u64,
        });
    }

    let digest = format!("{:x}", Sha256::digest(bytes));
    if digest != manifest.sha256.to_lowercase() {
        return Err(MlArtifactError::HashMismatch);
    }

    Ok(())
}

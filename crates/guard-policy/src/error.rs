//! Error types for policy loading and evaluation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or interpreting a policy document.
///
/// Policy errors are fatal for the request being served: the guard pipeline
/// is fail-closed on policy, so none of these are recoverable downstream.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy file does not exist or cannot be stat'ed.
    #[error("policy file {0} not found")]
    NotFound(PathBuf),

    /// The policy file exists but could not be read.
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid YAML or does not match the expected shape.
    #[error("failed to parse policy document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document parsed but contains nothing usable.
    #[error("policy file {0} is empty")]
    Empty(PathBuf),

    /// An allowlist entry is structurally invalid (neither `value` nor
    /// `regex`, or an unparseable regex).
    #[error("invalid allowlist entry: {0}")]
    InvalidAllowlist(String),

    /// A non-allowlist part of the document is malformed.
    #[error("invalid policy document: {0}")]
    InvalidDocument(String),
}

//! Error types for the guard pipeline.

use thiserror::Error;

/// Errors that abort a pipeline run.
///
/// The guard path is fail-open to detectors and fail-closed on policy, so
/// the only fatal conditions are policy loading and admission.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Policy could not be loaded; no request may be served.
    #[error("policy error: {0}")]
    Policy(#[from] guard_policy::PolicyError),

    /// Request body exceeds the advertised admission limit.
    #[error("request too large: {size} bytes (max: {max})")]
    RequestTooLarge { size: usize, max: usize },
}

//! # Guard Core - LLM Egress Guard Pipeline
//!
//! The egress guard sits between a large language model and its consumer.
//! It inspects outbound response text, detects policy-relevant content
//! (PII, credentials, dangerous commands, risky URLs, bulk-encoded
//! exfiltration blobs), and masks, delinks, annotates, or blocks the
//! response before it is returned - inline, on the request path.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         GUARD PIPELINE                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  response ──▶ Normalizer ──▶ Parser ──▶ Detector Registry        │
//! │                  │              │            │                   │
//! │                  │       segments + ML       │ short-circuit     │
//! │                  │       explain-only        ▼ on block          │
//! │                  │              │      Policy Evaluator          │
//! │                  │              │            │                   │
//! │                  ▼              ▼            ▼                   │
//! │             anomalies      context       Action Applier          │
//! │                            annotation        │                   │
//! │                                              ▼                   │
//! │                                       PipelineResult             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution Model
//!
//! The pipeline is single-threaded per request and entirely CPU-bound:
//! detectors run sequentially in a fixed order, and the only control-flow
//! variance is the short-circuit on the first blocking finding.
//! Cross-request concurrency, deadlines, and body-size admission belong to
//! the transport; the core advertises those limits via [`Settings`].
//!
//! ## Failure Model
//!
//! Fail-open on detectors, fail-closed on policy: a misbehaving detector
//! contributes nothing and the rest of the pipeline runs, but if the
//! policy document cannot be loaded no request is served.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guard_core::{run_pipeline, GuardRequest, Settings};
//!
//! let settings = Settings::from_env();
//! let request = GuardRequest::new("Reach out via jane.doe@example.com");
//! let result = run_pipeline(&request, &settings)?;
//! assert!(!result.blocked);
//! assert!(!result.response.contains("jane.doe@example.com"));
//! ```

pub mod actions;
mod error;
pub mod normalize;
pub mod parser;
pub mod preclassifier;
pub mod pipeline;
pub mod settings;
pub mod validator;

pub use error::GuardError;
pub use normalize::{normalize_text, NormalizationResult};
pub use parser::{parse_content, ParseOptions, ParsedContent, Segment, SegmentKind};
pub use pipeline::{run_pipeline, GuardRequest, PipelineResult};
pub use preclassifier::{
    load_preclassifier, HeuristicPreClassifier, KeywordModel, LoadedPreClassifier, MlArtifactError,
    PreClassifier,
};
pub use settings::Settings;
pub use validator::{FindingValidator, PassthroughValidator};

// Re-export component types for convenience
pub use guard_detectors::{scan_all, DetectorReport, DETECTOR_ORDER};
pub use guard_policy::{
    evaluate, invalidate, load_policy, load_safe_messages, Finding, FindingContext,
    PolicyDecision, PolicyDefinition, PolicyError, PolicyRule, PolicyStore, RuleAction, RuleType,
    SafeMessageCatalog,
};

/// Core result type for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

//! # Guard Policy - Rules, Allowlists, and Risk Evaluation
//!
//! This crate owns the policy half of the egress guard: the rule and
//! allowlist data model, the cached YAML policy store, the safe-message
//! catalog, and the evaluator that turns detector findings into a
//! block/mask decision.
//!
//! ## Policy Model
//!
//! A policy document declares one or more named policies. Each policy is a
//! set of [`PolicyRule`]s (what to look for and what to do about it), a set
//! of [`AllowlistEntry`]s (what to exempt), and [`ContextSettings`] that
//! tune how much the surrounding context (code block, link, educational
//! prose) shifts a finding's risk weight.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PolicyStore                           │
//! │   policy_id ──▶ PolicyDefinition                             │
//! │                   ├── rules:     [PolicyRule, ...]           │
//! │                   ├── allowlist: [AllowlistEntry, ...]       │
//! │                   └── context:   ContextSettings             │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                                    │
//!          │ mtime-keyed cache                  ▼
//!     policy.yaml                      evaluate(findings) ──▶ PolicyDecision
//! ```
//!
//! ## Caching
//!
//! [`load_policy`] caches stores by resolved path and file mtime. Two
//! consecutive loads without an mtime change return the *same*
//! `Arc<PolicyStore>`; editing the file (or calling [`invalidate`]) forces a
//! reload. The safe-message catalog in [`safe_messages`] follows the same
//! pattern.
//!
//! ## Failure Model
//!
//! Policy loading is fail-closed: a missing, empty, or structurally invalid
//! document is a [`PolicyError`] and no request may be served against it.
//! Evaluation itself is total - unknown rule IDs contribute the default
//! weight instead of failing.

mod allowlist;
mod error;
mod evaluator;
mod models;
pub mod safe_messages;
mod store;

pub use allowlist::AllowlistEntry;
pub use error::PolicyError;
pub use evaluator::{evaluate, DEFAULT_RULE_WEIGHT};
pub use models::{
    ContextSettings, Finding, FindingContext, PolicyDecision, PolicyDefinition, PolicyRule,
    PolicyStore, RuleAction, RuleType,
};
pub use safe_messages::{load_safe_messages, SafeMessage, SafeMessageCatalog};
pub use store::{invalidate, load_policy, load_policy_uncached};

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;

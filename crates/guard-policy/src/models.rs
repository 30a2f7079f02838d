//! # Core Types for the Policy Layer
//!
//! Defines the data model shared between the policy store, the detectors,
//! and the evaluator: rules, actions, findings, and decisions.
//!
//! ## Design Principles
//!
//! 1. **Sum types over strings** - rule types and actions are closed enums,
//!    so a typo in a policy file fails at load time, not at scan time.
//! 2. **Open detail bags** - a [`Finding`]'s `detail` map is deliberately
//!    untyped (`serde_json::Map`): detectors cooperate by convention
//!    (`span`, `masked`, `replacement`, `preview`, `reason`, ...) and new
//!    keys must not require a schema change.
//! 3. **Serializable** - every type derives Serde traits; `PipelineResult`
//!    on the wire is a direct serialization of these records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::allowlist::AllowlistEntry;

/// The detector family a rule belongs to.
///
/// | Variant | Detector | Typical targets |
/// |---------|----------|-----------------|
/// | `Pii` | PII scanner | emails, phones, IBANs, national IDs, cards |
/// | `Secret` | Secret scanner | API keys, tokens, private keys |
/// | `Url` | URL scanner | shorteners, IP literals, risky downloads |
/// | `Cmd` | Command scanner | curl-pipe, encoded PowerShell, LOLBins |
/// | `Exfil` | Exfiltration scanner | bulk base64/hex blobs |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Pii,
    Secret,
    Url,
    Cmd,
    Exfil,
}

impl RuleType {
    /// Lowercase label used in policy documents and allowlist constraints.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Pii => "pii",
            RuleType::Secret => "secret",
            RuleType::Url => "url",
            RuleType::Cmd => "cmd",
            RuleType::Exfil => "exfil",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with the text a rule matched.
///
/// `Mask`, `Delink`, `Annotate`, and `Remove` rewrite the matched span in
/// place; `Block` replaces the entire response with a safe message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Mask,
    Delink,
    Annotate,
    Remove,
    Block,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Mask => "mask",
            RuleAction::Delink => "delink",
            RuleAction::Annotate => "annotate",
            RuleAction::Remove => "remove",
            RuleAction::Block => "block",
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_severity() -> String {
    "medium".to_string()
}

fn default_risk_weight() -> i64 {
    crate::evaluator::DEFAULT_RULE_WEIGHT
}

/// A single policy rule.
///
/// Either `kind` selects a built-in scanner variant (e.g. `email`,
/// `curl_pipe`, `large_base64`) or `pattern` supplies a custom
/// case-insensitive regex. A rule with neither produces no matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Stable identifier, reported in findings and metrics.
    pub id: String,

    /// Detector family this rule is dispatched to.
    #[serde(rename = "type")]
    pub rule_type: RuleType,

    /// Action applied to matches.
    pub action: RuleAction,

    /// Built-in scanner variant key.
    #[serde(default)]
    pub kind: Option<String>,

    /// Custom regex pattern (compiled case-insensitively by the detector).
    #[serde(default)]
    pub pattern: Option<String>,

    /// Severity label for metrics; free-form, defaults to `medium`.
    #[serde(default = "default_severity")]
    pub severity: String,

    /// Contribution to the request risk score; clamped at >= 0 during
    /// evaluation. Accepts the legacy `weight` key.
    #[serde(default = "default_risk_weight", alias = "weight")]
    pub risk_weight: i64,

    /// Key into the safe-message catalog used when this rule blocks.
    #[serde(default)]
    pub safe_message: Option<String>,
}

/// Context-based risk adjustment knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Master switch; when off, findings score their raw rule weight.
    #[serde(default = "ContextSettings::default_enabled")]
    pub enabled: bool,

    /// Subtracted from findings sitting inside code blocks.
    #[serde(default = "ContextSettings::default_code_block_penalty")]
    pub code_block_penalty: i64,

    /// Subtracted from explain-only command findings.
    #[serde(default = "ContextSettings::default_explain_only_penalty")]
    pub explain_only_penalty: i64,

    /// Added to URL findings inside clickable links.
    #[serde(default = "ContextSettings::default_link_context_bonus")]
    pub link_context_bonus: i64,
}

impl ContextSettings {
    fn default_enabled() -> bool {
        true
    }
    fn default_code_block_penalty() -> i64 {
        15
    }
    fn default_explain_only_penalty() -> i64 {
        25
    }
    fn default_link_context_bonus() -> i64 {
        5
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            code_block_penalty: 15,
            explain_only_penalty: 25,
            link_context_bonus: 5,
        }
    }
}

/// A materialized policy ready for evaluation.
#[derive(Debug, Clone)]
pub struct PolicyDefinition {
    /// Identifier this policy was registered under.
    pub policy_id: String,

    /// Tier label from the document (`strict`, `default`, ...).
    pub tier: String,

    /// Allowlist entries, in declaration order.
    pub allowlist: Vec<AllowlistEntry>,

    /// Rules, in declaration order. Duplicate IDs are retained.
    pub rules: Vec<PolicyRule>,

    /// Context adjustment configuration.
    pub context_settings: ContextSettings,
}

impl PolicyDefinition {
    /// Iterate the rules of one detector family, in declaration order.
    pub fn rules_of(&self, rule_type: RuleType) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter().filter(move |r| r.rule_type == rule_type)
    }

    /// Look up a rule by ID. With duplicate IDs the first declaration wins,
    /// matching the evaluator's behavior.
    pub fn rule(&self, rule_id: &str) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// True if `candidate` is exempted for the given rule and tenant.
    ///
    /// Pure function of its inputs; the allowlist is immutable once loaded.
    pub fn is_allowlisted(
        &self,
        candidate: &str,
        rule: &PolicyRule,
        tenant: Option<&str>,
    ) -> bool {
        self.allowlist.iter().any(|entry| {
            entry.matches(
                candidate,
                rule.rule_type.as_str(),
                rule.kind.as_deref(),
                &rule.id,
                tenant,
            )
        })
    }
}

/// All policies from one document, keyed by policy ID.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    pub definitions: HashMap<String, PolicyDefinition>,
}

impl PolicyStore {
    /// Select a policy by ID, falling back to `"default"` and then to any
    /// registered policy. Loading guarantees at least one definition.
    pub fn select(&self, policy_id: &str) -> &PolicyDefinition {
        self.definitions
            .get(policy_id)
            .or_else(|| self.definitions.get("default"))
            .or_else(|| self.definitions.values().next())
            .expect("policy store contains at least one definition")
    }
}

/// The segment context a finding was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingContext {
    #[default]
    Text,
    Code,
    Link,
}

impl FindingContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingContext::Text => "text",
            FindingContext::Code => "code",
            FindingContext::Link => "link",
        }
    }
}

/// One hit emitted by a detector.
///
/// The `detail` map always carries `span` (`[start, end)` byte offsets into
/// the normalized text), `kind`, and `snippet_hash` (`sha256:<hex>` of the
/// raw match - never the raw value). Detectors add `masked`, `replacement`,
/// `preview`, `reason`, and scanner-specific keys by convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub action: RuleAction,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub detail: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub context: FindingContext,
    #[serde(default)]
    pub explain_only: bool,
}

impl Finding {
    /// String-valued detail lookup.
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.detail.get(key).and_then(|v| v.as_str())
    }

    /// The match span, when present and well-formed.
    pub fn span(&self) -> Option<(usize, usize)> {
        let span = self.detail.get("span")?.as_array()?;
        if span.len() != 2 {
            return None;
        }
        let start = span[0].as_u64()? as usize;
        let end = span[1].as_u64()? as usize;
        Some((start, end))
    }
}

/// Outcome of evaluating findings against a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// True when any block-action finding survived bypass checks.
    pub blocked: bool,

    /// Aggregate risk, clamped to `0..=100`.
    pub risk_score: i64,

    /// Rule IDs of all findings, in observation order.
    pub applied_rules: Vec<String>,

    /// Safe-message catalog key; always set when `blocked`.
    pub safe_message_key: Option<String>,
}

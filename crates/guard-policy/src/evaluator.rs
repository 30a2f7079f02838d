//! Policy evaluation: findings in, block/risk decision out.
//!
//! Every finding contributes its rule's risk weight, adjusted for the
//! context it was observed in, to an aggregate score clamped to `0..=100`.
//! A finding whose rule's action is `block` sets the blocked flag unless
//! the opt-in explain-only bypass applies.
//!
//! ## Context Adjustment
//!
//! Applied only when [`ContextSettings::enabled`]:
//!
//! | Condition | Adjustment |
//! |---|---|
//! | explain-only AND type is `cmd` | `-explain_only_penalty` |
//! | context is `code` AND not explain-only | `-code_block_penalty` |
//! | context is `link` AND type is `url` | `+link_context_bonus` |
//!
//! The explain-only and code penalties never stack; a per-finding adjusted
//! weight is clamped at zero before it is summed.

use tracing::debug;

use crate::models::{
    ContextSettings, Finding, FindingContext, PolicyDecision, PolicyDefinition, RuleAction,
    RuleType,
};

/// Weight contributed by findings whose rule is unknown, and the baseline
/// for rules that do not declare one.
pub const DEFAULT_RULE_WEIGHT: i64 = 10;

/// Maximum aggregate risk score.
const MAX_RISK_SCORE: i64 = 100;

fn apply_context_adjustment(
    finding: &Finding,
    base_risk: i64,
    settings: &ContextSettings,
) -> i64 {
    if !settings.enabled {
        return base_risk;
    }

    let mut adjusted = base_risk;

    // Strongest reduction, limited to command findings so real PII and
    // secrets are never discounted just for being "educational".
    if finding.explain_only && finding.rule_type == RuleType::Cmd {
        adjusted -= settings.explain_only_penalty;
    }

    if finding.context == FindingContext::Code && !finding.explain_only {
        adjusted -= settings.code_block_penalty;
    }

    if finding.context == FindingContext::Link && finding.rule_type == RuleType::Url {
        adjusted += settings.link_context_bonus;
    }

    adjusted.max(0)
}

/// Evaluate `findings` against `policy` and return a decision.
///
/// `allow_explain_only_bypass` is an explicit tenant opt-in: when true,
/// explain-only command findings never block, and other explain-only
/// findings skip blocking only when their adjusted weight fell below half
/// the default rule weight.
pub fn evaluate(
    policy: &PolicyDefinition,
    findings: &[Finding],
    allow_explain_only_bypass: bool,
) -> PolicyDecision {
    let mut blocked = false;
    let mut applied_rules = Vec::with_capacity(findings.len());
    let mut safe_message_key: Option<String> = None;
    let mut risk_score: i64 = 0;

    let settings = &policy.context_settings;

    for finding in findings {
        applied_rules.push(finding.rule_id.clone());

        let Some(rule) = policy.rule(&finding.rule_id) else {
            risk_score += DEFAULT_RULE_WEIGHT;
            continue;
        };

        let base_weight = rule.risk_weight.max(0);
        let adjusted_weight = apply_context_adjustment(finding, base_weight, settings);
        risk_score += adjusted_weight;

        if rule.action == RuleAction::Block {
            if allow_explain_only_bypass && finding.explain_only {
                if finding.rule_type == RuleType::Cmd {
                    debug!(rule_id = %rule.id, "explain-only command bypassed block");
                    continue;
                }
                if adjusted_weight < DEFAULT_RULE_WEIGHT / 2 {
                    debug!(rule_id = %rule.id, adjusted_weight, "explain-only finding bypassed block");
                    continue;
                }
            }
            blocked = true;
            if safe_message_key.is_none() {
                safe_message_key = rule.safe_message.clone();
            }
        } else if safe_message_key.is_none() {
            safe_message_key = rule.safe_message.clone();
        }
    }

    risk_score = risk_score.min(MAX_RISK_SCORE);

    if blocked && safe_message_key.is_none() {
        safe_message_key = Some("blocked".to_string());
    }

    PolicyDecision {
        blocked,
        risk_score,
        applied_rules,
        safe_message_key,
    }
}

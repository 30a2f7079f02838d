//! Action application: rewrite the response from findings, or replace it
//! with a safe message when blocked.
//!
//! Replacement is a single left-to-right cursor walk over the findings'
//! spans, stable-sorted by start offset. Later spans overlapping an
//! already-consumed region are skipped, so the output is deterministic
//! regardless of detector emission interleaving. Characters outside any
//! replacement are preserved byte-for-byte. Span arithmetic is total:
//! malformed spans (start >= end, out of range, mid-character) are
//! silently dropped rather than erroring.

use tracing::debug;

use guard_policy::{Finding, PolicyDecision, RuleAction, SafeMessageCatalog};

/// Default substitutions for actions without a scanner-supplied
/// replacement.
const MASK_REPLACEMENT: &str = "[REDACTED]";
const DELINK_REPLACEMENT: &str = "[redacted-url]";

/// Apply the decision to the text: the safe message when blocked,
/// otherwise span substitutions from the findings.
pub fn apply_actions(
    text: &str,
    findings: &[Finding],
    decision: &PolicyDecision,
    safe_messages: &SafeMessageCatalog,
) -> String {
    if decision.blocked {
        let key = decision.safe_message_key.as_deref().unwrap_or("blocked");
        return safe_messages.render(key);
    }

    let mut replacements = build_replacements(text, findings);
    if replacements.is_empty() {
        return text.to_string();
    }

    // Stable sort: ties keep finding order.
    replacements.sort_by_key(|(start, _, _)| *start);

    let mut output = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for (start, end, replacement) in replacements {
        if start < cursor {
            debug!(start, cursor, "skipping overlapping replacement");
            continue;
        }
        output.push_str(&text[cursor..start]);
        output.push_str(&replacement);
        cursor = cursor.max(end);
    }
    output.push_str(&text[cursor..]);
    output
}

fn build_replacements(text: &str, findings: &[Finding]) -> Vec<(usize, usize, String)> {
    let mut replacements = Vec::new();
    for finding in findings {
        if finding.action == RuleAction::Block {
            // Blocking is handled by the safe-message branch.
            continue;
        }
        let Some((start, end)) = finding.span() else {
            continue;
        };
        if start >= end || end > text.len() {
            continue;
        }
        if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
            continue;
        }
        let replacement = replacement_for(finding);
        replacements.push((start, end, replacement));
    }
    replacements
}

fn replacement_for(finding: &Finding) -> String {
    let supplied = finding
        .detail_str("replacement")
        .or_else(|| finding.detail_str("masked"));
    match finding.action {
        RuleAction::Mask => supplied.unwrap_or(MASK_REPLACEMENT).to_string(),
        RuleAction::Delink => finding
            .detail_str("replacement")
            .unwrap_or(DELINK_REPLACEMENT)
            .to_string(),
        RuleAction::Annotate => format!("[flagged:{}]", finding.rule_id),
        RuleAction::Remove => String::new(),
        RuleAction::Block => unreachable!("filtered before replacement building"),
    }
}

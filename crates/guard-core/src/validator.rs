//! Optional ML validation of PII findings.
//!
//! The validator is a post-filter seam: after the detectors run, PII
//! findings can be handed to an NER-style model that confirms or rejects
//! them. The default implementation passes everything through unchanged;
//! a model-backed validator plugs in behind the same trait.

use guard_policy::{Finding, RuleType};

/// Post-filter seam for detector findings.
pub trait FindingValidator: Send + Sync {
    fn name(&self) -> &str;

    /// Return the findings that survive validation. Only PII findings are
    /// handed in; other types never reach the validator.
    fn validate(&self, findings: Vec<Finding>, text: &str) -> Vec<Finding>;
}

/// Default validator: trusts the detectors and keeps every finding.
#[derive(Debug, Clone, Default)]
pub struct PassthroughValidator;

impl FindingValidator for PassthroughValidator {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn validate(&self, findings: Vec<Finding>, _text: &str) -> Vec<Finding> {
        findings
    }
}

/// Split findings, run PII ones through the validator, and reassemble in
/// the original observation order.
pub fn filter_pii_findings(
    findings: Vec<Finding>,
    text: &str,
    validator: &dyn FindingValidator,
) -> Vec<Finding> {
    let mut pii = Vec::new();
    let mut indexed_rest: Vec<(usize, Finding)> = Vec::new();
    let mut pii_slots: Vec<usize> = Vec::new();

    for (idx, finding) in findings.into_iter().enumerate() {
        if finding.rule_type == RuleType::Pii {
            pii_slots.push(idx);
            pii.push(finding);
        } else {
            indexed_rest.push((idx, finding));
        }
    }

    let validated = validator.validate(pii, text);

    // Survivors keep their original relative order; rejected findings
    // simply vanish from the sequence.
    let mut merged: Vec<(usize, Finding)> = indexed_rest;
    for (finding, slot) in validated.into_iter().zip(pii_slots) {
        merged.push((slot, finding));
    }
    merged.sort_by_key(|(idx, _)| *idx);
    merged.into_iter().map(|(_, finding)| finding).collect()
}

//! Exfiltration detector: bulk encoded blobs smuggled through the
//! response.
//!
//! Heuristic bounds are explicit and deliberately coarse: ten-plus lines
//! of dense base64 (with an entropy floor to skip padding-like filler) or
//! hex. Small encoded snippets are legitimate output and never flagged.

use regex::Regex;
use std::sync::LazyLock;

use guard_policy::{Finding, PolicyDefinition, PolicyRule, RuleType};

use crate::common::{self, RawMatch};

/// Minimum base64 payload after whitespace strip (80 chars x 10 lines).
const BASE64_MIN_LEN: usize = 800;
/// Entropy floor for base64 blobs, bits/char.
const BASE64_MIN_ENTROPY: f64 = 4.5;
/// Minimum hex payload after whitespace strip (64 chars x 10 lines).
const HEX_MIN_LEN: usize = 640;

static BASE64_BLOB_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[A-Za-z0-9+/]{80}\s*){10,}").unwrap());

static HEX_BLOB_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[0-9A-Fa-f]{64}\s*){10,}").unwrap());

/// Run all exfil rules of the policy over `text`.
pub fn scan(text: &str, policy: &PolicyDefinition, tenant: Option<&str>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for rule in policy.rules_of(RuleType::Exfil) {
        let matches = match rule.kind.as_deref() {
            Some("large_base64") => scan_base64(text),
            Some("large_hex") => scan_hex(text),
            _ => Vec::new(),
        };
        findings.extend(common::build_findings(policy, rule, matches, tenant));
    }
    findings
}

fn scan_base64(text: &str) -> Vec<RawMatch> {
    let mut results = Vec::new();
    for m in BASE64_BLOB_REGEX.find_iter(text) {
        let compact: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
        if compact.len() < BASE64_MIN_LEN {
            continue;
        }
        if common::shannon_entropy(&compact) < BASE64_MIN_ENTROPY {
            continue;
        }
        results.push(blob_match(m.as_str(), m.start(), m.end(), "[base64-blob]", compact.len()));
    }
    results
}

fn scan_hex(text: &str) -> Vec<RawMatch> {
    let mut results = Vec::new();
    for m in HEX_BLOB_REGEX.find_iter(text) {
        let compact: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
        if compact.len() < HEX_MIN_LEN {
            continue;
        }
        results.push(blob_match(m.as_str(), m.start(), m.end(), "[hex-blob]", compact.len()));
    }
    results
}

fn blob_match(value: &str, start: usize, end: usize, mask: &str, length: usize) -> RawMatch {
    RawMatch::new(value, start, end)
        .with("masked", mask)
        .with("replacement", mask)
        .with("preview", "[truncated-blob]")
        .with_num("length", length as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_policy::{ContextSettings, RuleAction};

    fn policy_with(kind: &str) -> PolicyDefinition {
        PolicyDefinition {
            policy_id: "default".to_string(),
            tier: "test".to_string(),
            allowlist: Vec::new(),
            rules: vec![PolicyRule {
                id: format!("EXFIL-{}", kind.to_uppercase().replace('_', "-")),
                rule_type: RuleType::Exfil,
                action: RuleAction::Block,
                kind: Some(kind.to_string()),
                pattern: None,
                severity: "high".to_string(),
                risk_weight: 50,
                safe_message: None,
            }],
            context_settings: ContextSettings::default(),
        }
    }

    /// Twelve 80-char lines of mixed-case base64 with digits and symbols.
    fn base64_payload() -> String {
        let lines = [
            "EnP8btR6mVL0JuwWCGtpI4jAWPGZTyo0ckBajLykgzHcGmZAH8lm2GG06PGESNUxG8iyKKh5ko9wWYw2",
            "fHqwQP3QzWiRdvi40a39QjjDmyyrU8ykrj4sVWXPXKSVkZLSiqwp6t6JYPdgB2HlKpKSaulnrNMUbM8d",
            "vpqInaoQIWWtBmI6hCivPgUmTgVpp3okaK5ZGlzjJVimNZTHwf5a4cODupqlukXyNExV547jP9IhGsYx",
            "drrAXiymSzqnNeiqRCS0tTzqOID8HamxvggEwOuPNuR03b94Dw8f6MeQOFKAGtdVkR4cMl5sjmq6jVla",
            "bQHSOUqfiX5ft5fWN0SOrolDwVqweq54idgZseeHDWY7dNR3atWt5OxqHo5bHYHnEGMLu8kwHHAHvdyq",
            "uWCJJUnPRHL6bqy8Ex2hzVtreg6EiuqEyru15q7Ah7hvVqX2cuklT2qAAwknMy2492dXSuOoj18R6BXD",
            "xRvhz7MEDtfgHKyIG79Ns2EzL3ou1EZp7JEM34dW73447TKEq3LsZibDbJb3l3wqJ2U00ut2SRUbmGfm",
            "aGRivleVqXVgIZqWxFQZszszb5X4hOZqZxvoOQZFBFKkYtUVBEBioXJY4aLI3zgEeYVK2sF9fek3q8nq",
            "1SeypJTtRNC59C2q76sN0Pi8MmBqaZNNW0p3uTVEslUkEzYEGdGYnenWXDJfswsHVvSAAdhcqcFNkERq",
            "Qu393QxNa7HXsazdr05GNUnFZj4lVfeRWySqrCtjhYczd03Mi5U0dnOH5Uv0vKxgtOE6AZmSm7O6spgR",
            "qDBqi65TLRKp7Q2q397glhQDBsnG0s5xwSm9xYICVYE3eJtqqvgK0wFt1rKvzXpq18lpMXHBoY3f9IaW",
            "9W1i40HqxreU0Yl99R5u7wqXj3qqYK4fpH7qrLnepbPBopmqBvwF8wAB",
        ];
        lines.join("\n")
    }

    #[test]
    fn large_base64_blob_is_blocked() {
        let policy = policy_with("large_base64");
        let findings = scan(&base64_payload(), &policy, None);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].action, RuleAction::Block);
        assert_eq!(findings[0].detail_str("masked"), Some("[base64-blob]"));
        assert!(findings[0].detail["length"].as_u64().unwrap() >= 800);
    }

    #[test]
    fn short_base64_snippet_is_fine() {
        let policy = policy_with("large_base64");
        let findings = scan("data: SGVsbG8gd29ybGQh just one line", &policy, None);
        assert!(findings.is_empty());
    }

    #[test]
    fn repetitive_base64_fails_the_entropy_floor() {
        let policy = policy_with("large_base64");
        let line = "A".repeat(80);
        let blob = (0..12).map(|_| line.clone()).collect::<Vec<_>>().join("\n");
        let findings = scan(&blob, &policy, None);
        assert!(findings.is_empty());
    }

    #[test]
    fn large_hex_blob_is_blocked() {
        let policy = policy_with("large_hex");
        let line: String = "0123456789abcdef".repeat(4);
        assert_eq!(line.len(), 64);
        let blob = (0..10).map(|_| line.clone()).collect::<Vec<_>>().join("\n");
        let findings = scan(&blob, &policy, None);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].detail_str("masked"), Some("[hex-blob]"));
    }

    #[test]
    fn nine_hex_lines_are_under_the_threshold() {
        let policy = policy_with("large_hex");
        let line: String = "0123456789abcdef".repeat(4);
        let blob = (0..9).map(|_| line.clone()).collect::<Vec<_>>().join("\n");
        let findings = scan(&blob, &policy, None);
        assert!(findings.is_empty());
    }
}

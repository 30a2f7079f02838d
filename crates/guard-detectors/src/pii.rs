//! PII detector: emails, locale phone numbers, IBANs, Turkish national
//! IDs, payment card numbers, and IPv4 literals.
//!
//! Matches are validated beyond the regex where a checksum exists (Luhn
//! for PANs, the TCKN digit checks, mod-97 for IBANs) to keep false
//! positives down, and every emitted finding carries a masked replacement
//! so the action applier never needs the raw value.

use regex::Regex;
use std::sync::LazyLock;

use guard_policy::{Finding, PolicyDefinition, PolicyRule, RuleType};

use crate::common::{self, RawMatch};

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").unwrap()
});

static IBAN_TR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bTR\d{2}(?:\s*\d{4}){5}\s*\d{2}\b").unwrap());

static IBAN_DE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDE\d{2}(?:\s*\d{4}){4}\s*\d{2}\b").unwrap());

static TCKN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{11}\b").unwrap());

static PAN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:4\d{3}(?:[ -]?\d{4}){3}|4\d{12}|5[1-5]\d{2}(?:[ -]?\d{4}){3}|6(?:011|5\d{2})(?:[ -]?\d{4}){3}|3[47]\d{2}[ -]?\d{6}[ -]?\d{5})\b",
    )
    .unwrap()
});

static IPV4_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b")
        .unwrap()
});

/// Locale-specific phone patterns, keyed by rule kind. The bare `phone`
/// key is a deliberately permissive catch-all; it over-matches and is kept
/// for compatibility rather than recommended for new policies.
static PHONE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("phone_tr", Regex::new(r"\b(?:\+?90|0)?\s?(?:5\d{2}|[2348]\d{2})[\s-]?\d{3}[\s-]?\d{2}[\s-]?\d{2}\b").unwrap()),
        ("phone_en", Regex::new(r"\b(?:\+?1|\+?44)?[-.\s]?(?:\(\d{3}\)|\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap()),
        ("phone_de", Regex::new(r"\b(?:\+?49)?[\s-]?(?:\(0\))?(?:1\d{2}|[2-9]\d{1,3})[\s-]?\d{3,8}\b").unwrap()),
        ("phone_fr", Regex::new(r"\b(?:\+?33|0)[\s.-]?[1-9](?:[\s.-]?\d{2}){4}\b").unwrap()),
        ("phone_es", Regex::new(r"\b(?:\+?34)?\s?(?:[67]\d{2}|9\d{2})\s?\d{3}\s?\d{3}\b").unwrap()),
        ("phone_it", Regex::new(r"\b(?:\+?39)?\s?3\d{2}\s?\d{3}\s?\d{4}\b").unwrap()),
        ("phone_pt", Regex::new(r"\b(?:\+?351)?\s?9\d{2}\s?\d{3}\s?\d{3}\b").unwrap()),
        ("phone_hi", Regex::new(r"\b(?:\+?91)?\s?[6-9]\d{4}\s?\d{5}\b").unwrap()),
        ("phone_zh", Regex::new(r"\b(?:\+?86)?\s?1[3-9]\d{9}\b").unwrap()),
        ("phone_ru", Regex::new(r"\b(?:\+?7|8)\s?\d{3}\s?\d{3}\s?\d{2}\s?\d{2}\b").unwrap()),
        ("phone", Regex::new(r"\b(?:\+?\d{1,3}[\s\-.]?)?(?:\(?\d{2,4}\)?[\s\-.]?){2,3}\d{2,4}\b").unwrap()),
    ]
});

/// Run all PII rules of the policy over `text`.
pub fn scan(text: &str, policy: &PolicyDefinition, tenant: Option<&str>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for rule in policy.rules_of(RuleType::Pii) {
        let matches = run_scanner(rule, text);
        findings.extend(common::build_findings(policy, rule, matches, tenant));
    }
    findings
}

fn run_scanner(rule: &PolicyRule, text: &str) -> Vec<RawMatch> {
    match rule.kind.as_deref() {
        Some("email") => scan_emails(text),
        Some(kind) if kind.starts_with("phone") => scan_phones(text, kind),
        Some("iban_tr") => scan_iban(text, &IBAN_TR_REGEX, "TR", 26),
        Some("iban_de") => scan_iban(text, &IBAN_DE_REGEX, "DE", 22),
        Some("tckn") => scan_tckn(text),
        Some("pan") => scan_pan(text),
        Some("ipv4") => scan_ipv4(text),
        _ => Vec::new(),
    }
}

fn scan_emails(text: &str) -> Vec<RawMatch> {
    EMAIL_REGEX
        .find_iter(text)
        .map(|m| {
            let masked = mask_email(m.as_str());
            RawMatch::new(m.as_str(), m.start(), m.end())
                .with("masked", masked.clone())
                .with("replacement", masked.clone())
                .with("preview", masked)
        })
        .collect()
}

fn scan_phones(text: &str, pattern_key: &str) -> Vec<RawMatch> {
    let pattern = PHONE_PATTERNS
        .iter()
        .find(|(key, _)| *key == pattern_key)
        .or_else(|| PHONE_PATTERNS.iter().find(|(key, _)| *key == "phone"))
        .map(|(_, re)| re)
        .expect("catch-all phone pattern exists");

    let mut results = Vec::new();
    for m in pattern.find_iter(text) {
        let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 9 || digits.len() > 15 {
            continue;
        }
        let masked = format!("***{}", &digits[digits.len() - 2..]);
        results.push(
            RawMatch::new(m.as_str(), m.start(), m.end())
                .with("masked", masked.clone())
                .with("replacement", masked.clone())
                .with("preview", masked)
                .with("pattern", pattern_key),
        );
    }
    results
}

fn scan_iban(text: &str, regex: &Regex, country: &str, expected_len: usize) -> Vec<RawMatch> {
    let mut results = Vec::new();
    for m in regex.find_iter(text) {
        let normalized: String = m
            .as_str()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        if normalized.len() != expected_len || !normalized.starts_with(country) {
            continue;
        }
        if !common::iban_mod97(&normalized) {
            continue;
        }
        let masked = format!(
            "{country}****************{}",
            &normalized[normalized.len() - 4..]
        );
        results.push(
            RawMatch::new(m.as_str(), m.start(), m.end())
                .with("masked", masked.clone())
                .with("replacement", masked.clone())
                .with("preview", masked),
        );
    }
    results
}

fn scan_tckn(text: &str) -> Vec<RawMatch> {
    let mut results = Vec::new();
    for m in TCKN_REGEX.find_iter(text) {
        let candidate = m.as_str();
        if !is_valid_tckn(candidate) {
            continue;
        }
        let masked = format!("********{}", &candidate[8..]);
        results.push(
            RawMatch::new(candidate, m.start(), m.end())
                .with("masked", masked.clone())
                .with("replacement", masked.clone())
                .with("preview", masked),
        );
    }
    results
}

fn scan_pan(text: &str) -> Vec<RawMatch> {
    let mut results = Vec::new();
    for m in PAN_REGEX.find_iter(text) {
        if !common::passes_luhn(m.as_str()) {
            continue;
        }
        let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        let masked = format!("**** **** **** {}", &digits[digits.len() - 4..]);
        results.push(
            RawMatch::new(m.as_str(), m.start(), m.end())
                .with("masked", masked.clone())
                .with("replacement", masked.clone())
                .with("preview", masked),
        );
    }
    results
}

fn scan_ipv4(text: &str) -> Vec<RawMatch> {
    IPV4_REGEX
        .find_iter(text)
        .map(|m| {
            RawMatch::new(m.as_str(), m.start(), m.end())
                .with("masked", "[ip-redacted]")
                .with("replacement", "[ip-redacted]")
                .with("preview", m.as_str())
        })
        .collect()
}

fn mask_email(value: &str) -> String {
    let Some((local, domain)) = value.split_once('@') else {
        return common::MASK_PLACEHOLDER.to_string();
    };
    let local_chars: Vec<char> = local.chars().collect();
    match local_chars.len() {
        0 => common::MASK_PLACEHOLDER.to_string(),
        1 | 2 => format!("{}*@{domain}", local_chars[0]),
        _ => format!(
            "{}***{}@{domain}",
            local_chars[0],
            local_chars[local_chars.len() - 1]
        ),
    }
}

/// Turkish national ID checksum: eleven digits, first nonzero,
/// `d[9] == (7·Σd_odd − Σd_even) mod 10` over the first nine digits and
/// `d[10] == Σd[0..10] mod 10`.
fn is_valid_tckn(value: &str) -> bool {
    if value.len() != 11 || !value.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<i64> = value
        .chars()
        .map(|c| i64::from(c.to_digit(10).unwrap_or(0)))
        .collect();
    if digits[0] == 0 {
        return false;
    }
    let odd_sum: i64 = digits[0..9].iter().step_by(2).sum();
    let even_sum: i64 = digits[1..8].iter().step_by(2).sum();
    let tenth = (odd_sum * 7 - even_sum).rem_euclid(10);
    if digits[9] != tenth {
        return false;
    }
    let total: i64 = digits[..10].iter().sum();
    digits[10] == total % 10
}

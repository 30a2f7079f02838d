//! Command detector: shell and PowerShell patterns that download-and-run,
//! destroy data, or abuse living-off-the-land binaries.
//!
//! Each built-in kind maps to one compiled pattern; custom rules bring
//! their own `pattern`. Findings carry a truncated `preview` of the
//! command and the kind as `reason` so operators can triage without the
//! raw text.

use regex::Regex;
use std::sync::LazyLock;

use guard_policy::{Finding, PolicyDefinition, PolicyRule, RuleType};

use crate::common::{self, RawMatch, CMD_PLACEHOLDER};

static CURL_PIPE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcurl\s+[^\n|]+?\|\s*(?:sh|bash)\b").unwrap());

static WGET_PIPE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bwget\s+[^\n|]+?\|\s*(?:sh|bash)\b").unwrap());

static POWERSHELL_ENC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpowershell(?:\.exe)?\s+-enc(?:odedcommand)?\s+[A-Za-z0-9+/=]+").unwrap()
});

static INVOKE_WEBREQUEST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\binvoke-webrequest\s+[^\n;]+?(?:\|\s*iex|\|\s*invoke-expression)").unwrap()
});

static POWERSHELL_IWR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:invoke-webrequest|iwr)\s+[^\n]+\|\s*powershell").unwrap()
});

static RM_RF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\brm\s+-rf\s+/\S*").unwrap());

static REG_ADD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\breg\s+add\s+[^\n]+").unwrap());

static CERTUTIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcertutil(?:\.exe)?\s+-urlcache(?:\s+-split)?\s+-f\s+\S+").unwrap()
});

static MSHTA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmshta(?:\.exe)?\s+\S+").unwrap());

static RUNDLL32_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\brundll32(?:\.exe)?\s+[^\s,]+,\S+").unwrap());

/// Run all command rules of the policy over `text`.
pub fn scan(text: &str, policy: &PolicyDefinition, tenant: Option<&str>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for rule in policy.rules_of(RuleType::Cmd) {
        let matches = run_scanner(rule, text);
        findings.extend(common::build_findings(policy, rule, matches, tenant));
    }
    findings
}

fn run_scanner(rule: &PolicyRule, text: &str) -> Vec<RawMatch> {
    if let Some(pattern) = rule.pattern.as_deref() {
        let Some(compiled) = common::compile_rule_pattern(pattern) else {
            return Vec::new();
        };
        return matches_with_reason(&compiled, text, "pattern");
    }
    let scanner: Option<&Regex> = match rule.kind.as_deref() {
        Some("curl_pipe") => Some(&CURL_PIPE_REGEX),
        Some("wget_pipe") => Some(&WGET_PIPE_REGEX),
        Some("powershell_encoded") => Some(&POWERSHELL_ENC_REGEX),
        Some("invoke_webrequest") => Some(&INVOKE_WEBREQUEST_REGEX),
        Some("powershell_iwr") => Some(&POWERSHELL_IWR_REGEX),
        Some("rm_rf") => Some(&RM_RF_REGEX),
        Some("reg_add") => Some(&REG_ADD_REGEX),
        Some("certutil") => Some(&CERTUTIL_REGEX),
        Some("mshta") => Some(&MSHTA_REGEX),
        Some("rundll32") => Some(&RUNDLL32_REGEX),
        _ => None,
    };
    match (scanner, rule.kind.as_deref()) {
        (Some(regex), Some(kind)) => matches_with_reason(regex, text, kind),
        _ => Vec::new(),
    }
}

fn matches_with_reason(regex: &Regex, text: &str, reason: &str) -> Vec<RawMatch> {
    regex
        .find_iter(text)
        .map(|m| {
            RawMatch::new(m.as_str(), m.start(), m.end())
                .with("masked", CMD_PLACEHOLDER)
                .with("replacement", CMD_PLACEHOLDER)
                .with("preview", common::truncate_preview(m.as_str(), 60))
                .with("reason", reason)
        })
        .collect()
}

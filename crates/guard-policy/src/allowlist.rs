//! Allowlist entries and their YAML parsing.
//!
//! An entry exempts a candidate string from producing a finding. Matching
//! requires every declared constraint set to admit the candidate's rule
//! properties (empty set = wildcard) AND either an exact value match or a
//! regex hit. Regexes are compiled once at load time, case-insensitively;
//! recompiling per candidate would be a performance bug.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashSet;

use crate::error::PolicyError;

/// A single allowlist matcher.
#[derive(Debug, Clone)]
pub struct AllowlistEntry {
    /// Exact-match value, if declared.
    pub value: Option<String>,

    /// Compiled case-insensitive regex, if declared.
    pub regex: Option<Regex>,

    /// Rule-type constraint (`pii`, `secret`, ...); empty = any.
    pub rule_types: HashSet<String>,

    /// Rule-kind constraint (`email`, `curl_pipe`, ...); empty = any.
    pub rule_kinds: HashSet<String>,

    /// Rule-ID constraint; empty = any.
    pub rule_ids: HashSet<String>,

    /// Tenant constraint; empty = any.
    pub tenants: HashSet<String>,
}

impl AllowlistEntry {
    /// Build an exact-value entry with no constraints.
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            regex: None,
            rule_types: HashSet::new(),
            rule_kinds: HashSet::new(),
            rule_ids: HashSet::new(),
            tenants: HashSet::new(),
        }
    }

    /// Build a regex entry with no constraints.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidAllowlist`] when the expression does
    /// not compile.
    pub fn regex(expr: &str) -> Result<Self, PolicyError> {
        Ok(Self {
            value: None,
            regex: Some(compile_allowlist_regex(expr)?),
            rule_types: HashSet::new(),
            rule_kinds: HashSet::new(),
            rule_ids: HashSet::new(),
            tenants: HashSet::new(),
        })
    }

    /// True when this entry exempts `candidate` for the given rule
    /// properties and tenant.
    ///
    /// Each constraint set must be empty or contain the corresponding
    /// property; a rule without a kind can never satisfy a kind constraint,
    /// and an anonymous request can never satisfy a tenant constraint.
    pub fn matches(
        &self,
        candidate: &str,
        rule_type: &str,
        rule_kind: Option<&str>,
        rule_id: &str,
        tenant: Option<&str>,
    ) -> bool {
        if !self.rule_types.is_empty() && !self.rule_types.contains(rule_type) {
            return false;
        }
        if !self.rule_kinds.is_empty()
            && !rule_kind.is_some_and(|kind| self.rule_kinds.contains(kind))
        {
            return false;
        }
        if !self.rule_ids.is_empty() && !self.rule_ids.contains(rule_id) {
            return false;
        }
        if !self.tenants.is_empty() && !tenant.is_some_and(|t| self.tenants.contains(t)) {
            return false;
        }
        if let Some(value) = &self.value {
            if candidate == value {
                return true;
            }
        }
        if let Some(regex) = &self.regex {
            if regex.is_match(candidate) {
                return true;
            }
        }
        false
    }
}

fn compile_allowlist_regex(expr: &str) -> Result<Regex, PolicyError> {
    RegexBuilder::new(expr)
        .case_insensitive(true)
        .build()
        .map_err(|e| PolicyError::InvalidAllowlist(format!("bad regex {expr:?}: {e}")))
}

/// A constraint value that may be written as a scalar or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_set(self) -> HashSet<String> {
        match self {
            OneOrMany::One(value) => HashSet::from([value]),
            OneOrMany::Many(values) => values.into_iter().collect(),
        }
    }
}

/// Raw allowlist entry as written in YAML: a bare string is an exact value;
/// a map declares value/regex plus constraint sets.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawAllowlistEntry {
    Plain(String),
    Detailed {
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        regex: Option<String>,
        #[serde(default)]
        types: Option<OneOrMany>,
        #[serde(default)]
        kinds: Option<OneOrMany>,
        #[serde(default)]
        rule_ids: Option<OneOrMany>,
        #[serde(default)]
        tenants: Option<OneOrMany>,
    },
}

/// Raw `allowlist_regex` entry: a bare string is a regex.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawRegexEntry {
    Plain(String),
    Detailed(RawAllowlistEntry),
}

pub(crate) fn parse_entry(
    raw: RawAllowlistEntry,
    default_tenants: &HashSet<String>,
) -> Result<AllowlistEntry, PolicyError> {
    match raw {
        RawAllowlistEntry::Plain(value) => Ok(AllowlistEntry {
            value: Some(value),
            regex: None,
            rule_types: HashSet::new(),
            rule_kinds: HashSet::new(),
            rule_ids: HashSet::new(),
            tenants: default_tenants.clone(),
        }),
        RawAllowlistEntry::Detailed {
            value,
            regex,
            types,
            kinds,
            rule_ids,
            tenants,
        } => {
            if value.is_none() && regex.is_none() {
                return Err(PolicyError::InvalidAllowlist(
                    "entry must define either 'value' or 'regex'".to_string(),
                ));
            }
            let compiled = regex.as_deref().map(compile_allowlist_regex).transpose()?;
            let mut tenant_set = tenants.map(OneOrMany::into_set).unwrap_or_default();
            tenant_set.extend(default_tenants.iter().cloned());
            Ok(AllowlistEntry {
                value,
                regex: compiled,
                rule_types: types.map(OneOrMany::into_set).unwrap_or_default(),
                rule_kinds: kinds.map(OneOrMany::into_set).unwrap_or_default(),
                rule_ids: rule_ids.map(OneOrMany::into_set).unwrap_or_default(),
                tenants: tenant_set,
            })
        }
    }
}

pub(crate) fn parse_regex_entry(
    raw: RawRegexEntry,
    default_tenants: &HashSet<String>,
) -> Result<AllowlistEntry, PolicyError> {
    match raw {
        RawRegexEntry::Plain(expr) => {
            let mut entry = AllowlistEntry::regex(&expr)?;
            entry.tenants = default_tenants.clone();
            Ok(entry)
        }
        RawRegexEntry::Detailed(detailed) => parse_entry(detailed, default_tenants),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_tenants() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn exact_value_matches_only_itself() {
        let entry = AllowlistEntry::value("ops@example.com");
        assert!(entry.matches("ops@example.com", "pii", Some("email"), "PII-EMAIL", None));
        assert!(!entry.matches("other@example.com", "pii", Some("email"), "PII-EMAIL", None));
    }

    #[test]
    fn regex_matches_case_insensitively_anywhere() {
        let entry = AllowlistEntry::regex(r"example\.com").unwrap();
        assert!(entry.matches("OPS@EXAMPLE.COM", "pii", Some("email"), "PII-EMAIL", None));
        assert!(entry.matches("see example.com today", "url", None, "URL-X", None));
    }

    #[test]
    fn empty_constraint_sets_are_wildcards() {
        let entry = AllowlistEntry::value("10.0.0.1");
        assert!(entry.matches("10.0.0.1", "pii", Some("ipv4"), "PII-IPV4", None));
        assert!(entry.matches("10.0.0.1", "url", Some("ip"), "URL-IP", Some("acme")));
    }

    #[test]
    fn type_constraint_excludes_other_types() {
        let mut entry = AllowlistEntry::value("10.0.0.1");
        entry.rule_types = HashSet::from(["pii".to_string()]);
        assert!(entry.matches("10.0.0.1", "pii", Some("ipv4"), "PII-IPV4", None));
        assert!(!entry.matches("10.0.0.1", "url", Some("ip"), "URL-IP", None));
    }

    #[test]
    fn kind_constraint_requires_a_kind() {
        let mut entry = AllowlistEntry::value("10.0.0.1");
        entry.rule_kinds = HashSet::from(["ipv4".to_string()]);
        assert!(!entry.matches("10.0.0.1", "pii", None, "PII-CUSTOM", None));
        assert!(entry.matches("10.0.0.1", "pii", Some("ipv4"), "PII-IPV4", None));
    }

    #[test]
    fn tenant_constraint_requires_a_tenant() {
        let mut entry = AllowlistEntry::value("10.0.0.1");
        entry.tenants = HashSet::from(["acme".to_string()]);
        assert!(!entry.matches("10.0.0.1", "pii", Some("ipv4"), "PII-IPV4", None));
        assert!(!entry.matches("10.0.0.1", "pii", Some("ipv4"), "PII-IPV4", Some("other")));
        assert!(entry.matches("10.0.0.1", "pii", Some("ipv4"), "PII-IPV4", Some("acme")));
    }

    #[test]
    fn entry_without_value_or_regex_fails_loudly() {
        let raw = RawAllowlistEntry::Detailed {
            value: None,
            regex: None,
            types: None,
            kinds: None,
            rule_ids: None,
            tenants: None,
        };
        assert!(matches!(
            parse_entry(raw, &no_tenants()),
            Err(PolicyError::InvalidAllowlist(_))
        ));
    }

    #[test]
    fn bad_regex_fails_loudly() {
        assert!(AllowlistEntry::regex("(unclosed").is_err());
    }

    #[test]
    fn scalar_constraint_becomes_singleton_set() {
        let yaml = "value: x\ntypes: pii\n";
        let raw: RawAllowlistEntry = serde_yaml::from_str(yaml).unwrap();
        let entry = parse_entry(raw, &no_tenants()).unwrap();
        assert_eq!(entry.rule_types, HashSet::from(["pii".to_string()]));
    }
}

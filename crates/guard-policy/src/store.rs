//! Policy document loading with an mtime-keyed process cache.
//!
//! Two accepted top-level shapes:
//!
//! ```yaml
//! # multi-policy
//! policies:
//!   default: { rules: [...], allowlist: [...] }
//!   strict:  { rules: [...] }
//! ```
//!
//! ```yaml
//! # bare body, registered as "default"
//! rules: [...]
//! allowlist: [...]
//! ```
//!
//! The cache key is the resolved absolute path; a cached store is reused
//! only while the file's mtime is unchanged, so editing the document is
//! picked up on the next request without a restart.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::SystemTime;

use serde::Deserialize;
use tracing::debug;

use crate::allowlist::{self, RawAllowlistEntry, RawRegexEntry};
use crate::error::PolicyError;
use crate::models::{ContextSettings, PolicyDefinition, PolicyRule, PolicyStore};

type CacheMap = HashMap<PathBuf, (SystemTime, Arc<PolicyStore>)>;

static POLICY_CACHE: LazyLock<Mutex<CacheMap>> = LazyLock::new(|| Mutex::new(HashMap::new()));

fn default_tier() -> String {
    "default".to_string()
}

/// One policy body as written in YAML.
#[derive(Debug, Deserialize)]
struct RawPolicyBody {
    #[serde(default = "default_tier", alias = "tier")]
    tiers: String,
    #[serde(default)]
    allowlist: Vec<RawAllowlistEntry>,
    #[serde(default)]
    allowlist_regex: Vec<RawRegexEntry>,
    #[serde(default)]
    tenant_allowlist: Option<serde_yaml::Value>,
    #[serde(default)]
    context_settings: Option<ContextSettings>,
    #[serde(default)]
    rules: Vec<PolicyRule>,
}

/// Tenant allowlist entries may be a list or a single entry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrManyEntries {
    One(RawAllowlistEntry),
    Many(Vec<RawAllowlistEntry>),
}

/// Load a policy store, consulting the process-wide cache.
///
/// Consecutive loads of an unchanged file return the same
/// `Arc<PolicyStore>` instance.
///
/// # Errors
///
/// Fails when the file is missing, unreadable, empty, or structurally
/// invalid. Policy loading is fail-closed by contract.
pub fn load_policy(path: &Path) -> Result<Arc<PolicyStore>, PolicyError> {
    let resolved = resolve(path)?;
    let mtime = modified_time(&resolved)?;

    {
        let cache = POLICY_CACHE.lock().expect("policy cache lock poisoned");
        if let Some((cached_mtime, store)) = cache.get(&resolved) {
            if *cached_mtime == mtime {
                debug!(path = %resolved.display(), "policy cache hit");
                return Ok(Arc::clone(store));
            }
        }
    }

    let store = Arc::new(parse_policy_file(&resolved)?);

    let mut cache = POLICY_CACHE.lock().expect("policy cache lock poisoned");
    cache.insert(resolved, (mtime, Arc::clone(&store)));
    Ok(store)
}

/// Load a policy store, bypassing the cache entirely.
pub fn load_policy_uncached(path: &Path) -> Result<Arc<PolicyStore>, PolicyError> {
    let resolved = resolve(path)?;
    Ok(Arc::new(parse_policy_file(&resolved)?))
}

/// Clear cached policy entries: one file, or all when `path` is `None`.
pub fn invalidate(path: Option<&Path>) {
    let mut cache = POLICY_CACHE.lock().expect("policy cache lock poisoned");
    match path {
        None => cache.clear(),
        Some(path) => {
            if let Ok(resolved) = resolve(path) {
                cache.remove(&resolved);
            }
        }
    }
}

fn resolve(path: &Path) -> Result<PathBuf, PolicyError> {
    path.canonicalize()
        .map_err(|_| PolicyError::NotFound(path.to_path_buf()))
}

fn modified_time(path: &Path) -> Result<SystemTime, PolicyError> {
    Ok(std::fs::metadata(path)?.modified()?)
}

fn parse_policy_file(path: &Path) -> Result<PolicyStore, PolicyError> {
    let raw = std::fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&raw)?;

    if value.is_null() {
        return Err(PolicyError::Empty(path.to_path_buf()));
    }

    let mut definitions = HashMap::new();

    let policies_value = value.get("policies").cloned();
    let policy_bodies: Vec<(String, RawPolicyBody)> = match policies_value {
        Some(policies) => {
            let table: HashMap<String, RawPolicyBody> = serde_yaml::from_value(policies)?;
            table.into_iter().collect()
        }
        None => {
            let body: RawPolicyBody = serde_yaml::from_value(value)?;
            vec![("default".to_string(), body)]
        }
    };

    for (policy_id, body) in policy_bodies {
        definitions.insert(policy_id.clone(), materialize(policy_id, body)?);
    }

    if definitions.is_empty() {
        return Err(PolicyError::Empty(path.to_path_buf()));
    }

    debug!(path = %path.display(), policies = definitions.len(), "policy loaded");
    Ok(PolicyStore { definitions })
}

fn materialize(policy_id: String, body: RawPolicyBody) -> Result<PolicyDefinition, PolicyError> {
    let no_tenants = HashSet::new();
    let mut allowlist = Vec::new();

    for raw in body.allowlist {
        allowlist.push(allowlist::parse_entry(raw, &no_tenants)?);
    }
    for raw in body.allowlist_regex {
        allowlist.push(allowlist::parse_regex_entry(raw, &no_tenants)?);
    }

    if let Some(tenant_value) = body.tenant_allowlist {
        let tenant_map: HashMap<String, OneOrManyEntries> = serde_yaml::from_value(tenant_value)
            .map_err(|_| {
                PolicyError::InvalidDocument(
                    "tenant_allowlist must be a mapping of tenant -> entries".to_string(),
                )
            })?;
        for (tenant, entries) in tenant_map {
            let default_tenants = HashSet::from([tenant]);
            let entries = match entries {
                OneOrManyEntries::One(entry) => vec![entry],
                OneOrManyEntries::Many(entries) => entries,
            };
            for raw in entries {
                allowlist.push(allowlist::parse_entry(raw, &default_tenants)?);
            }
        }
    }

    Ok(PolicyDefinition {
        policy_id,
        tier: body.tiers,
        allowlist,
        rules: body.rules,
        context_settings: body.context_settings.unwrap_or_default(),
    })
}

//! Safe-message catalog: the text substituted for a blocked response.
//!
//! The catalog is a YAML document of the shape
//! `safe_messages: {key: {title, description}}`, cached by resolved path
//! and mtime exactly like the policy store. Rendering falls back
//! progressively: `"{title}: {description}"`, then description alone, then
//! title alone, then a built-in English default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PolicyError;

/// Rendered when no catalog entry is available at all.
pub const DEFAULT_BLOCK_MESSAGE: &str = "Response blocked due to policy violation.";

type CacheMap = HashMap<PathBuf, (SystemTime, Arc<SafeMessageCatalog>)>;

static MESSAGE_CACHE: LazyLock<Mutex<CacheMap>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// One catalog entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafeMessage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// All safe messages from one document.
#[derive(Debug, Clone, Default)]
pub struct SafeMessageCatalog {
    pub messages: HashMap<String, SafeMessage>,
}

impl SafeMessageCatalog {
    /// Render the message for `key`, with progressive fallback.
    pub fn render(&self, key: &str) -> String {
        match self.messages.get(key) {
            Some(SafeMessage {
                title: Some(title),
                description: Some(description),
            }) => format!("{title}: {description}"),
            Some(SafeMessage {
                title: None,
                description: Some(description),
            }) => description.clone(),
            Some(SafeMessage {
                title: Some(title),
                description: None,
            }) => title.clone(),
            _ => DEFAULT_BLOCK_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    safe_messages: HashMap<String, SafeMessage>,
}

/// Load the catalog at `path`, consulting the process-wide cache.
///
/// # Errors
///
/// Fails when the file is missing, unreadable, or not valid YAML. Callers
/// that can tolerate a missing catalog should fall back to
/// [`SafeMessageCatalog::default`].
pub fn load_safe_messages(path: &Path) -> Result<Arc<SafeMessageCatalog>, PolicyError> {
    let resolved = path
        .canonicalize()
        .map_err(|_| PolicyError::NotFound(path.to_path_buf()))?;
    let mtime = std::fs::metadata(&resolved)?.modified()?;

    {
        let cache = MESSAGE_CACHE.lock().expect("message cache lock poisoned");
        if let Some((cached_mtime, catalog)) = cache.get(&resolved) {
            if *cached_mtime == mtime {
                return Ok(Arc::clone(catalog));
            }
        }
    }

    let raw = std::fs::read_to_string(&resolved)?;
    let parsed: RawCatalog = serde_yaml::from_str(&raw)?;
    let catalog = Arc::new(SafeMessageCatalog {
        messages: parsed.safe_messages,
    });
    debug!(path = %resolved.display(), entries = catalog.messages.len(), "safe messages loaded");

    let mut cache = MESSAGE_CACHE.lock().expect("message cache lock poisoned");
    cache.insert(resolved, (mtime, Arc::clone(&catalog)));
    Ok(catalog)
}

/// Clear cached catalogs: one file, or all when `path` is `None`.
pub fn invalidate(path: Option<&Path>) {
    let mut cache = MESSAGE_CACHE.lock().expect("message cache lock poisoned");
    match path {
        None => cache.clear(),
        Some(path) => {
            if let Ok(resolved) = path.canonicalize() {
                cache.remove(&resolved);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_catalog(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn renders_title_and_description() {
        let file = write_catalog(
            "safe_messages:\n  blocked:\n    title: Blocked\n    description: Policy violation detected.\n",
        );
        let catalog = load_safe_messages(file.path()).unwrap();
        assert_eq!(catalog.render("blocked"), "Blocked: Policy violation detected.");
    }

    #[test]
    fn falls_back_to_description_then_title() {
        let file = write_catalog(
            "safe_messages:\n  d_only:\n    description: Just a description.\n  t_only:\n    title: Just a title\n",
        );
        let catalog = load_safe_messages(file.path()).unwrap();
        assert_eq!(catalog.render("d_only"), "Just a description.");
        assert_eq!(catalog.render("t_only"), "Just a title");
    }

    #[test]
    fn unknown_key_renders_the_default() {
        let catalog = SafeMessageCatalog::default();
        assert_eq!(catalog.render("nope"), DEFAULT_BLOCK_MESSAGE);
    }

    #[test]
    fn cache_hit_returns_the_same_catalog() {
        let file = write_catalog("safe_messages:\n  blocked: {title: B, description: D}\n");
        invalidate(Some(file.path()));
        let first = load_safe_messages(file.path()).unwrap();
        let second = load_safe_messages(file.path()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        invalidate(Some(file.path()));
    }
}

//! Decoded-content cache.
//!
//! Keeps the decoded [`Content`] of recently read files keyed by vault
//! path. Reads hit the cache first; mutations keep it aligned with the
//! tree so a rename or move never strands an entry under a stale path.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::content::Content;

/// Path-keyed cache of decoded file content.
///
/// Keys are vault paths. Because sibling names are unique and paths are
/// `/`-joined, a file path can never be a prefix of another entry's
/// path, so prefix-based maintenance (`purge`, `migrate`) is exact.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: RwLock<HashMap<String, Content>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached content for a path, if present. Clones, so callers get an
    /// independent value.
    pub fn get(&self, path: &str) -> Option<Content> {
        self.entries.read().get(path).cloned()
    }

    /// Insert or replace the content for a path.
    pub fn insert(&self, path: impl Into<String>, content: Content) {
        self.entries.write().insert(path.into(), content);
    }

    /// Drop a single path.
    pub fn evict(&self, path: &str) {
        self.entries.write().remove(path);
    }

    /// Drop a path and everything cached under it.
    pub fn purge(&self, path: &str) {
        let prefix = format!("{}/", path);
        let mut entries = self.entries.write();
        entries.retain(|key, _| key != path && !key.starts_with(&prefix));
    }

    /// Rewrite keys after a rename or move: `old_path` itself plus every
    /// key under `old_path/` is re-homed below `new_path`.
    pub fn migrate(&self, old_path: &str, new_path: &str) {
        let prefix = format!("{}/", old_path);
        let mut entries = self.entries.write();

        let moved: Vec<(String, String)> = entries
            .keys()
            .filter_map(|key| {
                if key == old_path {
                    Some((key.clone(), new_path.to_string()))
                } else {
                    key.strip_prefix(&prefix)
                        .map(|rest| (key.clone(), format!("{}/{}", new_path, rest)))
                }
            })
            .collect();

        for (old_key, new_key) in moved {
            if let Some(content) = entries.remove(&old_key) {
                entries.insert(new_key, content);
            }
        }
    }

    /// Duplicate a cached entry under a second path, as after a copy.
    /// No-op when the source is not cached.
    pub fn copy_entry(&self, from: &str, to: &str) {
        let mut entries = self.entries.write();
        if let Some(content) = entries.get(from).cloned() {
            entries.insert(to.to_string(), content);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

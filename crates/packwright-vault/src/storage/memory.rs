//! In-memory storage.
//!
//! Used for tests and scratch vaults. All data is ephemeral.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{VaultError, VaultResult};
use crate::storage::{DirEntry, EntryKind, EntryMeta, Storage};

/// Entry in the memory store.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8> },
    Directory,
}

/// Storage backed by a hash map.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<PathBuf, Entry>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new empty store.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(PathBuf::from(""), Entry::Directory);
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                std::path::Component::RootDir => {}
                std::path::Component::CurDir => {}
                std::path::Component::ParentDir => {
                    result.pop();
                }
                std::path::Component::Normal(s) => {
                    result.push(s);
                }
                std::path::Component::Prefix(_) => {}
            }
        }
        result
    }

    /// Get the path string for error messages.
    fn path_str(path: &Path) -> String {
        path.display().to_string()
    }

    /// The parent must already exist as a directory, matching what the
    /// real filesystem enforces for writes and renames.
    fn check_parent(entries: &HashMap<PathBuf, Entry>, path: &Path) -> VaultResult<()> {
        let parent = path.parent().unwrap_or(Path::new(""));
        match entries.get(parent) {
            Some(Entry::Directory) => Ok(()),
            Some(Entry::File { .. }) => Err(VaultError::other(format!(
                "not a directory: {}",
                Self::path_str(parent)
            ))),
            None => Err(VaultError::not_found(Self::path_str(parent))),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn stat(&self, path: &Path) -> VaultResult<EntryMeta> {
        let normalized = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::File { data }) => Ok(EntryMeta {
                kind: EntryKind::File,
                size: data.len() as u64,
            }),
            Some(Entry::Directory) => Ok(EntryMeta {
                kind: EntryKind::Directory,
                size: 0,
            }),
            None => Err(VaultError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn list_dir(&self, path: &Path) -> VaultResult<Vec<DirEntry>> {
        let normalized = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::Directory) => {}
            Some(Entry::File { .. }) => {
                return Err(VaultError::other(format!(
                    "not a directory: {}",
                    Self::path_str(&normalized)
                )));
            }
            None => return Err(VaultError::not_found(Self::path_str(&normalized))),
        }

        let mut result = Vec::new();
        for (entry_path, entry) in entries.iter() {
            if entry_path.parent() == Some(normalized.as_path()) && entry_path != &normalized {
                if let Some(name) = entry_path.file_name() {
                    let kind = match entry {
                        Entry::File { .. } => EntryKind::File,
                        Entry::Directory => EntryKind::Directory,
                    };
                    result.push(DirEntry {
                        name: name.to_string_lossy().into_owned(),
                        kind,
                    });
                }
            }
        }

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &Path) -> VaultResult<Vec<u8>> {
        let normalized = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::File { data }) => Ok(data.clone()),
            Some(Entry::Directory) => Err(VaultError::other(format!(
                "is a directory: {}",
                Self::path_str(&normalized)
            ))),
            None => Err(VaultError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> VaultResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        if matches!(entries.get(&normalized), Some(Entry::Directory)) {
            return Err(VaultError::other(format!(
                "is a directory: {}",
                Self::path_str(&normalized)
            )));
        }
        Self::check_parent(&entries, &normalized)?;

        entries.insert(
            normalized,
            Entry::File {
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    async fn create_dir(&self, path: &Path) -> VaultResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        let mut current = PathBuf::new();
        for component in normalized.components() {
            if let std::path::Component::Normal(s) = component {
                current.push(s);
                match entries.get(&current) {
                    Some(Entry::Directory) => {}
                    Some(Entry::File { .. }) => {
                        return Err(VaultError::other(format!(
                            "not a directory: {}",
                            Self::path_str(&current)
                        )));
                    }
                    None => {
                        entries.insert(current.clone(), Entry::Directory);
                    }
                }
            }
        }
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> VaultResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::File { .. }) => {
                entries.remove(&normalized);
                Ok(())
            }
            Some(Entry::Directory) => Err(VaultError::other(format!(
                "is a directory: {}",
                Self::path_str(&normalized)
            ))),
            None => Err(VaultError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn remove_dir(&self, path: &Path) -> VaultResult<()> {
        let normalized = Self::normalize(path);
        if normalized.as_os_str().is_empty() {
            return Err(VaultError::other("cannot remove the root"));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::Directory) => {}
            Some(Entry::File { .. }) => {
                return Err(VaultError::other(format!(
                    "not a directory: {}",
                    Self::path_str(&normalized)
                )));
            }
            None => return Err(VaultError::not_found(Self::path_str(&normalized))),
        }

        let has_children = entries
            .keys()
            .any(|k| k.parent() == Some(normalized.as_path()) && k != &normalized);
        if has_children {
            return Err(VaultError::other(format!(
                "directory not empty: {}",
                Self::path_str(&normalized)
            )));
        }

        entries.remove(&normalized);
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> VaultResult<()> {
        let normalized = Self::normalize(path);
        if normalized.as_os_str().is_empty() {
            return Err(VaultError::other("cannot remove the root"));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        match entries.get(&normalized) {
            Some(Entry::Directory) => {}
            Some(Entry::File { .. }) => {
                return Err(VaultError::other(format!(
                    "not a directory: {}",
                    Self::path_str(&normalized)
                )));
            }
            None => return Err(VaultError::not_found(Self::path_str(&normalized))),
        }

        // starts_with is component-wise, so removing "a" leaves "ab" alone
        entries.retain(|k, _| !k.starts_with(&normalized));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VaultResult<()> {
        let from_normalized = Self::normalize(from);
        let to_normalized = Self::normalize(to);

        let mut entries = self
            .entries
            .write()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        Self::check_parent(&entries, &to_normalized)?;

        let entry = entries
            .remove(&from_normalized)
            .ok_or_else(|| VaultError::not_found(Self::path_str(&from_normalized)))?;

        // Directories bring their whole subtree along
        if matches!(entry, Entry::Directory) {
            let children: Vec<_> = entries
                .keys()
                .filter(|k| k.starts_with(&from_normalized))
                .cloned()
                .collect();

            for child in children {
                if let Some(child_entry) = entries.remove(&child) {
                    if let Ok(relative) = child.strip_prefix(&from_normalized) {
                        entries.insert(to_normalized.join(relative), child_entry);
                    }
                }
            }
        }

        entries.insert(to_normalized, entry);
        Ok(())
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> VaultResult<()> {
        let from_normalized = Self::normalize(from);
        let to_normalized = Self::normalize(to);

        let mut entries = self
            .entries
            .write()
            .map_err(|_| VaultError::other("lock poisoned"))?;

        let data = match entries.get(&from_normalized) {
            Some(Entry::File { data }) => data.clone(),
            Some(Entry::Directory) => {
                return Err(VaultError::other(format!(
                    "is a directory: {}",
                    Self::path_str(&from_normalized)
                )));
            }
            None => return Err(VaultError::not_found(Self::path_str(&from_normalized))),
        };

        Self::check_parent(&entries, &to_normalized)?;
        entries.insert(to_normalized, Entry::File { data });
        Ok(())
    }
}

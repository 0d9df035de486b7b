//! Storage backends.
//!
//! The [`Storage`] trait is the seam between the vault and whatever
//! actually holds the bytes. Two implementations ship here:
//!
//! - [`LocalStorage`] — a directory on the real filesystem
//! - [`MemoryStorage`] — a hash map, for tests and scratch vaults
//!
//! All paths are relative to the backend's root. The vault handles
//! naming rules, locking, events, and caching above this trait; backends
//! only move bytes.

mod local;
mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VaultResult;

/// What kind of entry a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Minimal metadata for a storage entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub kind: EntryKind,
    /// Byte length for files, zero for directories.
    pub size: u64,
}

/// A single directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        DirEntry {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        DirEntry {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// Byte-level storage operations.
///
/// Paths are relative to the backend root; the empty path is the root
/// directory itself. Whole-file reads and writes only — the entries a
/// vault manages are small enough that offset I/O buys nothing.
#[async_trait]
pub trait Storage: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get entry metadata.
    async fn stat(&self, path: &Path) -> VaultResult<EntryMeta>;

    /// List a directory, sorted by name.
    async fn list_dir(&self, path: &Path) -> VaultResult<Vec<DirEntry>>;

    /// Read a whole file.
    async fn read(&self, path: &Path) -> VaultResult<Vec<u8>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write a whole file, creating or truncating it.
    async fn write(&self, path: &Path, data: &[u8]) -> VaultResult<()>;

    /// Create a directory, including missing parents. Succeeds when the
    /// directory already exists.
    async fn create_dir(&self, path: &Path) -> VaultResult<()>;

    /// Remove a file.
    async fn remove_file(&self, path: &Path) -> VaultResult<()>;

    /// Remove an empty directory.
    async fn remove_dir(&self, path: &Path) -> VaultResult<()>;

    /// Remove a directory and everything under it.
    async fn remove_dir_all(&self, path: &Path) -> VaultResult<()>;

    /// Rename an entry. Parents of the destination must already exist.
    async fn rename(&self, from: &Path, to: &Path) -> VaultResult<()>;

    /// Copy a single file.
    async fn copy_file(&self, from: &Path, to: &Path) -> VaultResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.stat(path).await.is_ok()
    }
}

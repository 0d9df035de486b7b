//! Local filesystem storage.
//!
//! Maps vault paths onto a directory on disk, with path security to
//! prevent escaping the root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::{VaultError, VaultResult};
use crate::storage::{DirEntry, EntryKind, EntryMeta, Storage};

/// Storage rooted at a real directory.
///
/// All operations are relative to `root`: with root `/home/amy/vault`,
/// `read("global/setting.json")` reads
/// `/home/amy/vault/global/setting.json`.
///
/// Attempts to escape the root via `..` are blocked.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create storage rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a vault path to an absolute path under the root.
    ///
    /// Rejects absolute paths and any `..` component outright; vault
    /// paths are plain relative segments, so those only show up when a
    /// caller is trying to escape.
    fn resolve(&self, path: &Path) -> VaultResult<PathBuf> {
        let path = path.strip_prefix("/").unwrap_or(path);

        if path.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        for component in path.components() {
            match component {
                std::path::Component::Normal(_) | std::path::Component::CurDir => {}
                _ => {
                    return Err(VaultError::other(format!(
                        "path escapes storage root: {}",
                        path.display()
                    )));
                }
            }
        }

        Ok(self.root.join(path))
    }

    /// Absolute on-disk location of a vault path, canonicalized.
    ///
    /// The entry must exist. Uses dunce for clean paths (no `\\?\` on
    /// Windows).
    pub fn real_path(&self, path: &Path) -> VaultResult<PathBuf> {
        let full = self.resolve(path)?;
        dunce::canonicalize(&full).map_err(VaultError::from)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn stat(&self, path: &Path) -> VaultResult<EntryMeta> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).await.map_err(VaultError::from)?;
        Ok(if meta.is_dir() {
            EntryMeta {
                kind: EntryKind::Directory,
                size: 0,
            }
        } else {
            EntryMeta {
                kind: EntryKind::File,
                size: meta.len(),
            }
        })
    }

    async fn list_dir(&self, path: &Path) -> VaultResult<Vec<DirEntry>> {
        let full = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full).await.map_err(VaultError::from)?;

        while let Some(entry) = dir.next_entry().await.map_err(VaultError::from)? {
            let file_type = entry.file_type().await.map_err(VaultError::from)?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path) -> VaultResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).await.map_err(VaultError::from)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> VaultResult<()> {
        let full = self.resolve(path)?;
        fs::write(&full, data).await.map_err(VaultError::from)
    }

    async fn create_dir(&self, path: &Path) -> VaultResult<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).await.map_err(VaultError::from)
    }

    async fn remove_file(&self, path: &Path) -> VaultResult<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).await.map_err(VaultError::from)
    }

    async fn remove_dir(&self, path: &Path) -> VaultResult<()> {
        let full = self.resolve(path)?;
        fs::remove_dir(&full).await.map_err(VaultError::from)
    }

    async fn remove_dir_all(&self, path: &Path) -> VaultResult<()> {
        let full = self.resolve(path)?;
        fs::remove_dir_all(&full).await.map_err(VaultError::from)
    }

    async fn rename(&self, from: &Path, to: &Path) -> VaultResult<()> {
        let from_full = self.resolve(from)?;
        let to_full = self.resolve(to)?;
        fs::rename(&from_full, &to_full)
            .await
            .map_err(VaultError::from)
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> VaultResult<()> {
        let from_full = self.resolve(from)?;
        let to_full = self.resolve(to)?;
        fs::copy(&from_full, &to_full)
            .await
            .map(|_| ())
            .map_err(VaultError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (LocalStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        (storage, dir)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (storage, _dir) = setup().await;

        storage
            .write(Path::new("test.txt"), b"hello world")
            .await
            .unwrap();

        let data = storage.read(Path::new("test.txt")).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_stat() {
        let (storage, _dir) = setup().await;

        storage.write(Path::new("a.txt"), b"abc").await.unwrap();
        storage.create_dir(Path::new("sub")).await.unwrap();

        let file = storage.stat(Path::new("a.txt")).await.unwrap();
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 3);

        let dir = storage.stat(Path::new("sub")).await.unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_list_dir_sorted() {
        let (storage, _dir) = setup().await;

        storage.create_dir(Path::new("sub")).await.unwrap();
        storage.write(Path::new("b.txt"), b"b").await.unwrap();
        storage.write(Path::new("a.txt"), b"a").await.unwrap();

        let entries = storage.list_dir(Path::new("")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "sub"]);
        assert_eq!(entries[2].kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_rename() {
        let (storage, _dir) = setup().await;

        storage.write(Path::new("old.txt"), b"content").await.unwrap();
        storage
            .rename(Path::new("old.txt"), Path::new("new.txt"))
            .await
            .unwrap();

        assert!(!storage.exists(Path::new("old.txt")).await);
        let data = storage.read(Path::new("new.txt")).await.unwrap();
        assert_eq!(data, b"content");
    }

    #[tokio::test]
    async fn test_copy_file() {
        let (storage, _dir) = setup().await;

        storage.write(Path::new("src.txt"), b"payload").await.unwrap();
        storage
            .copy_file(Path::new("src.txt"), Path::new("dst.txt"))
            .await
            .unwrap();

        assert_eq!(storage.read(Path::new("src.txt")).await.unwrap(), b"payload");
        assert_eq!(storage.read(Path::new("dst.txt")).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_remove_dir_all() {
        let (storage, _dir) = setup().await;

        storage.create_dir(Path::new("a/b")).await.unwrap();
        storage.write(Path::new("a/b/c.txt"), b"x").await.unwrap();

        storage.remove_dir_all(Path::new("a")).await.unwrap();
        assert!(!storage.exists(Path::new("a")).await);
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (storage, _dir) = setup().await;

        let result = storage.read(Path::new("../../../etc/passwd")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_real_path() {
        let (storage, dir) = setup().await;

        std::fs::write(dir.path().join("test.txt"), "hello").unwrap();

        let real = storage.real_path(Path::new("test.txt")).unwrap();
        assert!(real.is_absolute());
        assert!(real.ends_with("test.txt"));
    }
}

//! Soft-delete holding area.
//!
//! Trashed entries are renamed into the reserved `trash/` directory
//! under an opaque key and described in `trash/manifest.json`, an array
//! of [`TrashRecord`]s. The manifest remembers enough to put an entry
//! back where it came from; the trash directory itself is flat and
//! never part of the vault tree. Key selection and manifest
//! read-modify-write cycles run under one async lock, so concurrent
//! trash traffic can neither share a key nor overwrite each other's
//! records.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};
use crate::storage::{EntryKind, Storage};

/// Reserved directory holding trashed entries.
pub const TRASH_DIR: &str = "trash";

/// Manifest location inside the trash directory.
const MANIFEST_PATH: &str = "trash/manifest.json";

/// One trashed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashRecord {
    /// Storage key inside `trash/`. Usually the bare entry name; a
    /// `~`-suffixed tag is appended when that key is already taken.
    pub key: String,
    /// Vault path the entry was trashed from.
    pub original_path: String,
    /// Entry name at trash time.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub trashed_at: DateTime<Utc>,
}

/// Manifest-backed view of the trash directory.
#[derive(Clone)]
pub struct TrashBin {
    storage: Arc<dyn Storage>,
    /// Serializes key selection and manifest read-modify-write cycles.
    lock: Arc<Mutex<()>>,
}

impl TrashBin {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Storage path of a trashed entry.
    pub fn entry_path(key: &str) -> String {
        format!("{}/{}", TRASH_DIR, key)
    }

    /// Read the manifest. A missing manifest is an empty trash.
    pub async fn load(&self) -> VaultResult<Vec<TrashRecord>> {
        let bytes = match self.storage.read(Path::new(MANIFEST_PATH)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::parse(format!("{}: {}", MANIFEST_PATH, e)))
    }

    /// All records, oldest first.
    pub async fn records(&self) -> VaultResult<Vec<TrashRecord>> {
        let mut records = self.load().await?;
        records.sort_by_key(|r| r.trashed_at);
        Ok(records)
    }

    /// Append a record to the manifest.
    pub async fn add(&self, record: TrashRecord) -> VaultResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.push(record);
        self.save(&records).await
    }

    /// Look up a record by key.
    pub async fn find(&self, key: &str) -> VaultResult<Option<TrashRecord>> {
        Ok(self.load().await?.into_iter().find(|r| r.key == key))
    }

    /// Remove and return a record by key.
    pub async fn take(&self, key: &str) -> VaultResult<Option<TrashRecord>> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let Some(index) = records.iter().position(|r| r.key == key) else {
            return Ok(None);
        };
        let record = records.remove(index);
        self.save(&records).await?;
        Ok(Some(record))
    }

    /// Move a storage entry into the trash and record it.
    ///
    /// Key selection, the rename and the manifest append form one
    /// critical section. When the manifest write fails the entry is
    /// renamed back out, so a success means the record is durably
    /// listed.
    pub async fn stash(&self, path: &str, kind: EntryKind) -> VaultResult<TrashRecord> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;

        let name = path.rsplit('/').next().unwrap_or(path);
        let key = self.free_key(name).await;
        let trash_path = Self::entry_path(&key);
        self.storage
            .rename(Path::new(path), Path::new(&trash_path))
            .await?;

        let record = TrashRecord {
            key,
            original_path: path.to_string(),
            name: name.to_string(),
            kind,
            trashed_at: Utc::now(),
        };
        records.push(record.clone());
        if let Err(e) = self.save(&records).await {
            if let Err(undo) = self
                .storage
                .rename(Path::new(&trash_path), Path::new(path))
                .await
            {
                tracing::warn!(path = %trash_path, error = %undo, "cleanup failed");
            }
            return Err(e);
        }
        Ok(record)
    }

    /// Move a trashed entry back to its original path and drop its
    /// record. The caller is responsible for the destination being
    /// free and its parent directory existing.
    ///
    /// When the manifest write fails the entry is renamed back into
    /// the trash, so the manifest keeps listing exactly what the
    /// trash directory holds.
    pub async fn restore(&self, key: &str) -> VaultResult<TrashRecord> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let Some(index) = records.iter().position(|r| r.key == key) else {
            return Err(VaultError::not_found(format!("trash entry {key}")));
        };
        let record = records.remove(index);

        let trash_path = Self::entry_path(key);
        self.storage
            .rename(Path::new(&trash_path), Path::new(&record.original_path))
            .await?;

        if let Err(e) = self.save(&records).await {
            if let Err(undo) = self
                .storage
                .rename(Path::new(&record.original_path), Path::new(&trash_path))
                .await
            {
                tracing::warn!(path = %record.original_path, error = %undo, "cleanup failed");
            }
            return Err(e);
        }
        Ok(record)
    }

    /// Pick a free storage key for an entry entering the trash.
    ///
    /// The bare name is preferred so the trash directory stays legible;
    /// when a previous casualty already holds it, a short random tag is
    /// appended until a free key is found. The manifest's own name is
    /// never handed out. Callers hold the bin lock.
    async fn free_key(&self, name: &str) -> String {
        if name != "manifest.json"
            && !self.storage.exists(Path::new(&Self::entry_path(name))).await
        {
            return name.to_string();
        }
        loop {
            let tag = Uuid::new_v4().simple().to_string();
            let candidate = format!("{}~{}", name, &tag[..8]);
            if !self
                .storage
                .exists(Path::new(&Self::entry_path(&candidate)))
                .await
            {
                return candidate;
            }
        }
    }

    async fn save(&self, records: &[TrashRecord]) -> VaultResult<()> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| VaultError::parse(format!("{}: {}", MANIFEST_PATH, e)))?;
        self.storage.write(Path::new(MANIFEST_PATH), &bytes).await
    }
}

impl std::fmt::Debug for TrashBin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrashBin").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DirEntry, EntryMeta, MemoryStorage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(key: &str, original_path: &str) -> TrashRecord {
        TrashRecord {
            key: key.to_string(),
            original_path: original_path.to_string(),
            name: key.split('~').next().unwrap_or(key).to_string(),
            kind: EntryKind::File,
            trashed_at: Utc::now(),
        }
    }

    async fn setup() -> (TrashBin, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        storage.create_dir(Path::new(TRASH_DIR)).await.unwrap();
        storage.create_dir(Path::new("character")).await.unwrap();
        storage.create_dir(Path::new("preset")).await.unwrap();
        (TrashBin::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_empty_trash_loads_as_empty() {
        let (bin, _storage) = setup().await;
        assert!(bin.load().await.unwrap().is_empty());
        assert!(bin.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_find_take() {
        let (bin, _storage) = setup().await;

        bin.add(record("a.txt", "character/a.txt")).await.unwrap();
        bin.add(record("b.txt", "preset/b.txt")).await.unwrap();

        let found = bin.find("a.txt").await.unwrap().unwrap();
        assert_eq!(found.original_path, "character/a.txt");

        let taken = bin.take("a.txt").await.unwrap().unwrap();
        assert_eq!(taken.key, "a.txt");
        assert!(bin.find("a.txt").await.unwrap().is_none());
        assert!(bin.find("b.txt").await.unwrap().is_some());

        assert!(bin.take("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manifest_survives_reload() {
        let (bin, storage) = setup().await;
        bin.add(record("a.txt", "a.txt")).await.unwrap();

        // Fresh bin over the same storage sees the same manifest
        let again = TrashBin::new(storage);
        let records = again.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "a.txt");
    }

    #[tokio::test]
    async fn test_stash_uses_bare_name() {
        let (bin, storage) = setup().await;
        storage
            .write(Path::new("character/a.txt"), b"body")
            .await
            .unwrap();

        let rec = bin.stash("character/a.txt", EntryKind::File).await.unwrap();
        assert_eq!(rec.key, "a.txt");
        assert_eq!(rec.original_path, "character/a.txt");
        assert_eq!(rec.name, "a.txt");
        assert!(storage.exists(Path::new("trash/a.txt")).await);
        assert!(!storage.exists(Path::new("character/a.txt")).await);
        assert_eq!(bin.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stash_disambiguates_taken_key() {
        let (bin, storage) = setup().await;
        storage
            .write(Path::new("character/a.txt"), b"one")
            .await
            .unwrap();
        storage.write(Path::new("preset/a.txt"), b"two").await.unwrap();

        let first = bin.stash("character/a.txt", EntryKind::File).await.unwrap();
        let second = bin.stash("preset/a.txt", EntryKind::File).await.unwrap();
        assert_eq!(first.key, "a.txt");
        assert!(second.key.starts_with("a.txt~"));
        assert_eq!(second.key.len(), "a.txt~".len() + 8);

        // both payloads survive under their own keys
        assert_eq!(storage.read(Path::new("trash/a.txt")).await.unwrap(), b"one");
        assert_eq!(
            storage
                .read(Path::new(&TrashBin::entry_path(&second.key)))
                .await
                .unwrap(),
            b"two"
        );
        assert_eq!(bin.records().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stash_never_claims_manifest_key() {
        let (bin, storage) = setup().await;
        storage
            .write(Path::new("character/manifest.json"), b"{}")
            .await
            .unwrap();

        let rec = bin
            .stash("character/manifest.json", EntryKind::File)
            .await
            .unwrap();
        assert!(rec.key.starts_with("manifest.json~"));
        // the real manifest still parses and lists the entry
        assert!(bin.find(&rec.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let (bin, storage) = setup().await;
        storage
            .write(Path::new("character/a.txt"), b"body")
            .await
            .unwrap();
        let rec = bin.stash("character/a.txt", EntryKind::File).await.unwrap();

        let restored = bin.restore(&rec.key).await.unwrap();
        assert_eq!(restored.original_path, "character/a.txt");
        assert_eq!(
            storage.read(Path::new("character/a.txt")).await.unwrap(),
            b"body"
        );
        assert!(!storage.exists(Path::new("trash/a.txt")).await);
        assert!(bin.records().await.unwrap().is_empty());

        let err = bin.restore(&rec.key).await.unwrap_err();
        assert!(err.is_not_found());
    }

    /// Storage that refuses manifest writes while armed.
    struct FlakyManifestStorage {
        inner: MemoryStorage,
        fail_manifest_writes: AtomicBool,
    }

    impl FlakyManifestStorage {
        fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                fail_manifest_writes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Storage for FlakyManifestStorage {
        async fn stat(&self, path: &Path) -> VaultResult<EntryMeta> {
            self.inner.stat(path).await
        }
        async fn list_dir(&self, path: &Path) -> VaultResult<Vec<DirEntry>> {
            self.inner.list_dir(path).await
        }
        async fn read(&self, path: &Path) -> VaultResult<Vec<u8>> {
            self.inner.read(path).await
        }
        async fn write(&self, path: &Path, data: &[u8]) -> VaultResult<()> {
            if path == Path::new(MANIFEST_PATH)
                && self.fail_manifest_writes.load(Ordering::SeqCst)
            {
                return Err(VaultError::Io(std::io::Error::other(
                    "manifest write refused",
                )));
            }
            self.inner.write(path, data).await
        }
        async fn create_dir(&self, path: &Path) -> VaultResult<()> {
            self.inner.create_dir(path).await
        }
        async fn remove_file(&self, path: &Path) -> VaultResult<()> {
            self.inner.remove_file(path).await
        }
        async fn remove_dir(&self, path: &Path) -> VaultResult<()> {
            self.inner.remove_dir(path).await
        }
        async fn remove_dir_all(&self, path: &Path) -> VaultResult<()> {
            self.inner.remove_dir_all(path).await
        }
        async fn rename(&self, from: &Path, to: &Path) -> VaultResult<()> {
            self.inner.rename(from, to).await
        }
        async fn copy_file(&self, from: &Path, to: &Path) -> VaultResult<()> {
            self.inner.copy_file(from, to).await
        }
    }

    async fn flaky_setup() -> (TrashBin, Arc<FlakyManifestStorage>) {
        let storage = Arc::new(FlakyManifestStorage::new());
        storage.create_dir(Path::new(TRASH_DIR)).await.unwrap();
        storage.create_dir(Path::new("character")).await.unwrap();
        (TrashBin::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_stash_manifest_failure_renames_back() {
        let (bin, storage) = flaky_setup().await;
        storage
            .write(Path::new("character/a.txt"), b"body")
            .await
            .unwrap();

        storage.fail_manifest_writes.store(true, Ordering::SeqCst);
        let err = bin
            .stash("character/a.txt", EntryKind::File)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Io(_)));
        // the entry is back at its origin and the trash never saw it
        assert!(storage.exists(Path::new("character/a.txt")).await);
        assert!(!storage.exists(Path::new("trash/a.txt")).await);
        assert!(bin.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_manifest_failure_renames_back_into_trash() {
        let (bin, storage) = flaky_setup().await;
        storage
            .write(Path::new("character/a.txt"), b"body")
            .await
            .unwrap();
        let rec = bin.stash("character/a.txt", EntryKind::File).await.unwrap();

        storage.fail_manifest_writes.store(true, Ordering::SeqCst);
        let err = bin.restore(&rec.key).await.unwrap_err();
        assert!(matches!(err, VaultError::Io(_)));
        // the entry stays in trash and stays listed, so a later restore
        // still works
        assert!(storage.exists(Path::new("trash/a.txt")).await);
        assert!(!storage.exists(Path::new("character/a.txt")).await);
        assert!(bin.find(&rec.key).await.unwrap().is_some());

        storage.fail_manifest_writes.store(false, Ordering::SeqCst);
        bin.restore(&rec.key).await.unwrap();
        assert_eq!(
            storage.read(Path::new("character/a.txt")).await.unwrap(),
            b"body"
        );
        assert!(bin.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manifest_wire_shape() {
        let (bin, storage) = setup().await;
        let mut rec = record("a.txt", "character/a.txt");
        rec.kind = EntryKind::Directory;
        bin.add(rec).await.unwrap();

        let bytes = storage.read(Path::new("trash/manifest.json")).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value[0]["key"], "a.txt");
        assert_eq!(value[0]["originalPath"], "character/a.txt");
        assert_eq!(value[0]["type"], "directory");
        assert!(value[0]["trashedAt"].is_string());
    }
}

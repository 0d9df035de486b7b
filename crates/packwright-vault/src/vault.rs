//! The vault façade: one storage root behind a single coordinated handle.
//!
//! A [`Vault`] owns the tree snapshot, the content cache, the change-event
//! bus, the task dispatcher, the trash bin and the settings store, and runs
//! every mutation through the same pipeline: fail-fast checks, storage I/O,
//! a short tree commit, cache maintenance, then event emission. Events are
//! published only after the mutation and the cache both settled, so
//! subscribers never observe a state the vault itself has not reached.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::cache::ContentCache;
use crate::config::VaultConfig;
use crate::content::{Content, SemanticKind};
use crate::error::{VaultError, VaultResult};
use crate::events::{ChangeEvent, SharedChangeBus, Subscription, shared_change_bus};
use crate::naming::unique_name;
use crate::settings::SettingsStore;
use crate::storage::{DirEntry, EntryKind, LocalStorage, Storage};
use crate::tasks::TaskDispatcher;
use crate::trash::{TRASH_DIR, TrashBin, TrashRecord};
use crate::tree::{NodeId, NodeKind, Tree};

/// Required top-level directories, created at open when missing.
pub const GLOBAL_DIR: &str = "global";
pub const CHARACTER_DIR: &str = "character";
pub const PRESET_DIR: &str = "preset";
/// Seed files for [`Vault::create_typed_file`] live here.
pub const TEMPLATE_DIR: &str = "global/template";

/// Bootstrap settings files, created with `{}` and locked at open.
pub const SETTING_PATH: &str = "setting.[setting].json";
pub const MODEL_CONFIG_PATH: &str = "modelConfig.[modelConfig].json";

const REQUIRED_DIRS: [&str; 5] = [GLOBAL_DIR, CHARACTER_DIR, PRESET_DIR, TRASH_DIR, TEMPLATE_DIR];
const SETTINGS_PATHS: [&str; 2] = [SETTING_PATH, MODEL_CONFIG_PATH];

/// Collapse repeated separators and strip leading/trailing ones.
/// The root is the empty string.
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Split a normalized path into `(parent, name)`. Top-level entries
/// report the root (`""`) as parent.
fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

fn validate_name(name: &str) -> VaultResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(VaultError::other(format!("invalid entry name: {name:?}")));
    }
    Ok(())
}

/// Coordinated view of one content directory.
pub struct Vault {
    storage: Arc<dyn Storage>,
    tree: RwLock<Tree>,
    cache: Arc<ContentCache>,
    bus: SharedChangeBus,
    tasks: Arc<TaskDispatcher>,
    trash: TrashBin,
    settings: Arc<SettingsStore>,
    /// Paths that reject user mutation.
    locked: RwLock<HashSet<String>>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("tree", &"<locked>")
            .field("locked", &"<locked>")
            .finish_non_exhaustive()
    }
}

impl Vault {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Open the vault rooted at `config.root`, creating the directory
    /// skeleton and bootstrap settings files when missing.
    pub async fn open(config: VaultConfig) -> VaultResult<Arc<Self>> {
        let storage = Arc::new(LocalStorage::new(&config.root));
        Self::with_storage(storage, config).await
    }

    /// Open over an explicit storage backend.
    pub async fn with_storage(
        storage: Arc<dyn Storage>,
        config: VaultConfig,
    ) -> VaultResult<Arc<Self>> {
        for dir in REQUIRED_DIRS {
            storage.create_dir(Path::new(dir)).await?;
        }
        for path in SETTINGS_PATHS {
            if !storage.exists(Path::new(path)).await {
                storage.write(Path::new(path), b"{}").await?;
            }
        }

        let tree = scan(storage.as_ref()).await?;
        let cache = Arc::new(ContentCache::new());
        let bus = shared_change_bus(config.event_capacity);
        let settings = Arc::new(SettingsStore::new(
            storage.clone(),
            cache.clone(),
            bus.clone(),
            SETTINGS_PATHS.iter().map(|p| p.to_string()).collect(),
            config.settings_debounce,
        ));
        settings.preload().await?;
        settings.start_worker();

        let vault = Self {
            storage: storage.clone(),
            tree: RwLock::new(tree),
            cache,
            bus,
            tasks: Arc::new(TaskDispatcher::new()),
            trash: TrashBin::new(storage),
            settings,
            locked: RwLock::new(HashSet::new()),
        };
        for path in SETTINGS_PATHS {
            vault.lock_path(path);
        }
        tracing::debug!(nodes = vault.tree.read().len(), "vault opened");
        Ok(Arc::new(vault))
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// The storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The shared content cache.
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// The change-event bus.
    pub fn bus(&self) -> &SharedChangeBus {
        &self.bus
    }

    /// The dispatcher tracking cancellable operations.
    pub fn tasks(&self) -> &Arc<TaskDispatcher> {
        &self.tasks
    }

    /// The write-behind settings store. Updates through it bypass the
    /// locked-path set; that set guards user mutations only.
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Subscribe to change events filtered by subject pattern
    /// (`file.*`, `dir.deleted`, `>` for everything).
    pub fn subscribe(&self, pattern: &str) -> Subscription<ChangeEvent> {
        self.bus.subscribe(pattern)
    }

    /// Flush pending settings and stop the debounce worker.
    pub async fn shutdown(&self) {
        self.settings.shutdown().await;
    }

    // ========================================================================
    // Read side
    // ========================================================================

    /// Resolve a path to its node id. `""` is the root.
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        self.tree.read().resolve(&normalize(path))
    }

    /// Current path of a node, if it is still in the tree.
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        self.tree.read().path_of(id)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Entry kind at `path`, if present.
    pub fn node_kind(&self, path: &str) -> Option<EntryKind> {
        let tree = self.tree.read();
        let id = tree.resolve(&normalize(path))?;
        tree.get(id).map(|node| {
            if node.is_file() {
                EntryKind::File
            } else {
                EntryKind::Directory
            }
        })
    }

    /// Children of a folder, name-sorted.
    pub fn children(&self, path: &str) -> VaultResult<Vec<DirEntry>> {
        let path = normalize(path);
        let tree = self.tree.read();
        let id = tree
            .resolve(&path)
            .ok_or_else(|| VaultError::not_found(&path))?;
        if !tree.is_folder(id) {
            return Err(VaultError::other(format!("not a folder: {path}")));
        }
        Ok(tree
            .children_of(id)
            .into_iter()
            .map(|(name, child)| {
                if tree.is_file(child) {
                    DirEntry::file(name)
                } else {
                    DirEntry::directory(name)
                }
            })
            .collect())
    }

    /// Read a file, decoding per the name rules. Serves the cached value
    /// unless `force` asks for a fresh load from storage.
    pub async fn read(&self, path: &str, force: bool) -> VaultResult<Content> {
        let path = normalize(path);
        if !force {
            if let Some(content) = self.cache.get(&path) {
                return Ok(content);
            }
        }
        {
            let tree = self.tree.read();
            let id = tree
                .resolve(&path)
                .ok_or_else(|| VaultError::not_found(&path))?;
            if !tree.is_file(id) {
                return Err(VaultError::other(format!("not a file: {path}")));
            }
        }
        let bytes = self.storage.read(Path::new(&path)).await?;
        let (_, name) = split_path(&path);
        let content = Content::decode(name, bytes)?;
        self.cache.insert(&path, content.clone());
        Ok(content)
    }

    // ========================================================================
    // Locked paths
    // ========================================================================

    /// Protect a path from user mutation (write/rename/move/delete/trash).
    pub fn lock_path(&self, path: &str) {
        self.locked.write().insert(normalize(path));
    }

    /// Lift a lock. Returns whether the path was locked.
    pub fn unlock_path(&self, path: &str) -> bool {
        self.locked.write().remove(&normalize(path))
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.locked.read().contains(&normalize(path))
    }

    /// Locked paths, sorted.
    pub fn locked_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.locked.read().iter().cloned().collect();
        paths.sort();
        paths
    }

    /// `path` must already be normalized.
    fn check_unlocked(&self, path: &str) -> VaultResult<()> {
        if self.locked.read().contains(path) {
            return Err(VaultError::locked(path));
        }
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Overwrite an existing file and publish *file modified*.
    pub async fn write(&self, path: &str, content: Content) -> VaultResult<()> {
        let path = normalize(path);
        self.check_unlocked(&path)?;
        {
            let tree = self.tree.read();
            let id = tree
                .resolve(&path)
                .ok_or_else(|| VaultError::not_found(&path))?;
            if !tree.is_file(id) {
                return Err(VaultError::other(format!("not a file: {path}")));
            }
        }
        let bytes = content.to_bytes()?;
        self.storage.write(Path::new(&path), &bytes).await?;
        self.cache.insert(&path, content);
        self.bus.publish(ChangeEvent::FileModified { path });
        Ok(())
    }

    /// Create a file under `parent` and publish *file created*.
    ///
    /// The node is attached before the bytes are persisted, so racing
    /// creators serialize on the sibling map; when the persist fails the
    /// node is rolled back out.
    pub async fn create_file(
        &self,
        parent: &str,
        name: &str,
        content: Content,
    ) -> VaultResult<String> {
        let parent = normalize(parent);
        validate_name(name)?;
        let path = join_path(&parent, name);
        self.check_unlocked(&path)?;
        let bytes = content.to_bytes()?;

        let id = {
            let mut tree = self.tree.write();
            let parent_id = tree
                .resolve(&parent)
                .ok_or_else(|| VaultError::not_found(&parent))?;
            if !tree.is_folder(parent_id) {
                return Err(VaultError::other(format!("not a folder: {parent}")));
            }
            tree.attach(parent_id, name, NodeKind::File)?
        };

        if let Err(e) = self.storage.write(Path::new(&path), &bytes).await {
            let _ = self.tree.write().remove_subtree(id);
            return Err(e);
        }

        self.cache.insert(&path, content.clone());
        self.bus.publish(ChangeEvent::FileCreated {
            path: path.clone(),
            content: Some(content),
        });
        Ok(path)
    }

    /// Create a folder under `parent` and publish *dir created*.
    pub async fn create_dir(&self, parent: &str, name: &str) -> VaultResult<String> {
        let parent = normalize(parent);
        validate_name(name)?;
        let path = join_path(&parent, name);
        self.check_unlocked(&path)?;

        let id = {
            let mut tree = self.tree.write();
            let parent_id = tree
                .resolve(&parent)
                .ok_or_else(|| VaultError::not_found(&parent))?;
            if !tree.is_folder(parent_id) {
                return Err(VaultError::other(format!("not a folder: {parent}")));
            }
            tree.attach(parent_id, name, NodeKind::folder())?
        };

        if let Err(e) = self.storage.create_dir(Path::new(&path)).await {
            let _ = self.tree.write().remove_subtree(id);
            return Err(e);
        }

        self.bus.publish(ChangeEvent::DirCreated { path: path.clone() });
        Ok(path)
    }

    /// Create `{base}.[{kind}].json` under `parent`, seeded from the
    /// matching template in [`TEMPLATE_DIR`] when one exists, else `{}`.
    pub async fn create_typed_file(
        &self,
        parent: &str,
        base: &str,
        kind: SemanticKind,
    ) -> VaultResult<String> {
        validate_name(base)?;
        let name = format!("{base}.[{kind}].json");
        let template = format!("{TEMPLATE_DIR}/TEMPLATE.[{kind}].json");
        let content = if self.exists(&template) {
            self.read(&template, false).await?
        } else {
            Content::Json(json!({}))
        };
        self.create_file(parent, &name, content).await
    }

    /// Import raw bytes as a new uniquely-named file under `target`,
    /// tracked as a task. Decoding happens before anything is touched,
    /// so malformed input leaves no trace.
    pub async fn import_file(
        &self,
        target: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> VaultResult<String> {
        let target = normalize(target);
        validate_name(file_name)?;
        let label = format!("import {}", join_path(&target, file_name));
        self.tasks
            .dispatch(label, |token| async move {
                if token.is_cancelled() {
                    return Err(VaultError::Cancelled);
                }
                let content = Content::decode(file_name, bytes)?;
                let name = {
                    let tree = self.tree.read();
                    let id = tree
                        .resolve(&target)
                        .ok_or_else(|| VaultError::not_found(&target))?;
                    if !tree.is_folder(id) {
                        return Err(VaultError::other(format!("not a folder: {target}")));
                    }
                    let taken: HashSet<String> =
                        tree.children_of(id).into_iter().map(|(n, _)| n).collect();
                    unique_name(file_name, |candidate| taken.contains(candidate))
                };
                self.create_file(&target, &name, content).await
            })
            .await
    }

    /// Rename a file or folder in place and publish *renamed*.
    pub async fn rename(&self, path: &str, new_name: &str) -> VaultResult<String> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(VaultError::other("cannot rename the root"));
        }
        validate_name(new_name)?;
        let (parent, name) = split_path(&path);
        let new_path = join_path(parent, new_name);
        if name == new_name {
            // a no-op rename still requires the entry to exist
            if !self.exists(&path) {
                return Err(VaultError::not_found(&path));
            }
            return Ok(new_path);
        }
        self.check_unlocked(&path)?;
        self.check_unlocked(&new_path)?;

        let (id, is_dir) = {
            let tree = self.tree.read();
            let id = tree
                .resolve(&path)
                .ok_or_else(|| VaultError::not_found(&path))?;
            if tree.resolve(&new_path).is_some() {
                return Err(VaultError::collision(&new_path));
            }
            (id, tree.is_folder(id))
        };

        self.storage
            .rename(Path::new(&path), Path::new(&new_path))
            .await?;

        let committed = self.tree.write().rename_node(id, new_name);
        if let Err(e) = committed {
            // storage already moved; put it back
            if let Err(undo) = self
                .storage
                .rename(Path::new(&new_path), Path::new(&path))
                .await
            {
                tracing::warn!(path = %new_path, error = %undo, "cleanup failed");
            }
            return Err(e);
        }

        self.cache.migrate(&path, &new_path);
        let event = if is_dir {
            ChangeEvent::DirRenamed {
                old_path: path,
                new_path: new_path.clone(),
            }
        } else {
            ChangeEvent::FileRenamed {
                old_path: path,
                new_path: new_path.clone(),
            }
        };
        self.bus.publish(event);
        Ok(new_path)
    }

    /// Move a file or folder into the `target` folder and publish *moved*.
    pub async fn move_to(&self, path: &str, target: &str) -> VaultResult<String> {
        let path = normalize(path);
        let target = normalize(target);
        if path.is_empty() {
            return Err(VaultError::other("cannot move the root"));
        }
        self.check_unlocked(&path)?;
        let (parent, name) = split_path(&path);
        let new_path = join_path(&target, name);
        if target == parent {
            // a no-op move still requires the entry to exist
            if !self.exists(&path) {
                return Err(VaultError::not_found(&path));
            }
            return Ok(path);
        }
        self.check_unlocked(&new_path)?;

        let (id, target_id, is_dir) = {
            let tree = self.tree.read();
            let id = tree
                .resolve(&path)
                .ok_or_else(|| VaultError::not_found(&path))?;
            let target_id = tree
                .resolve(&target)
                .ok_or_else(|| VaultError::not_found(&target))?;
            if !tree.is_folder(target_id) {
                return Err(VaultError::other(format!("not a folder: {target}")));
            }
            if id == target_id || tree.is_ancestor(id, target_id) {
                return Err(VaultError::other(format!("cannot move {path} into itself")));
            }
            if tree.resolve(&new_path).is_some() {
                return Err(VaultError::collision(&new_path));
            }
            (id, target_id, tree.is_folder(id))
        };

        self.storage
            .rename(Path::new(&path), Path::new(&new_path))
            .await?;

        let committed = self.tree.write().move_node(id, target_id);
        if let Err(e) = committed {
            if let Err(undo) = self
                .storage
                .rename(Path::new(&new_path), Path::new(&path))
                .await
            {
                tracing::warn!(path = %new_path, error = %undo, "cleanup failed");
            }
            return Err(e);
        }

        self.cache.migrate(&path, &new_path);
        let event = if is_dir {
            ChangeEvent::DirMoved {
                old_path: path,
                new_path: new_path.clone(),
            }
        } else {
            ChangeEvent::FileMoved {
                old_path: path,
                new_path: new_path.clone(),
            }
        };
        self.bus.publish(event);
        Ok(new_path)
    }

    /// Delete a file in place, or a folder recursively as a tracked
    /// cancellable task.
    pub async fn delete(&self, path: &str) -> VaultResult<()> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(VaultError::other("cannot delete the root"));
        }
        self.check_unlocked(&path)?;
        let is_dir = {
            let tree = self.tree.read();
            let id = tree
                .resolve(&path)
                .ok_or_else(|| VaultError::not_found(&path))?;
            tree.is_folder(id)
        };
        if !is_dir {
            return self.delete_file_at(&path).await;
        }
        let label = format!("delete {path}");
        self.tasks
            .dispatch(label, |token| async move {
                self.delete_entry(&path, &token).await
            })
            .await
    }

    /// Delete every child of a folder, keeping the folder itself.
    /// Tracked as a task; cancellation is polled between children.
    pub async fn empty(&self, path: &str) -> VaultResult<()> {
        let path = normalize(path);
        self.check_unlocked(&path)?;
        let children = {
            let tree = self.tree.read();
            let id = tree
                .resolve(&path)
                .ok_or_else(|| VaultError::not_found(&path))?;
            if !tree.is_folder(id) {
                return Err(VaultError::other(format!("not a folder: {path}")));
            }
            tree.children_of(id)
                .into_iter()
                .map(|(name, _)| name)
                .collect::<Vec<_>>()
        };
        let label = format!("empty {path}");
        self.tasks
            .dispatch(label, |token| async move {
                for name in children {
                    if token.is_cancelled() {
                        return Err(VaultError::Cancelled);
                    }
                    self.delete_entry(&join_path(&path, &name), &token).await?;
                }
                Ok(())
            })
            .await
    }

    async fn delete_file_at(&self, path: &str) -> VaultResult<()> {
        self.storage.remove_file(Path::new(path)).await?;
        {
            let mut tree = self.tree.write();
            if let Some(id) = tree.resolve(path) {
                let _ = tree.remove_subtree(id);
            }
        }
        self.cache.evict(path);
        self.bus.publish(ChangeEvent::FileDeleted {
            path: path.to_string(),
        });
        Ok(())
    }

    /// Recursive delete, children first. Polls the token and the locked
    /// set on every entry, so a locked descendant aborts the walk with
    /// everything above it intact.
    fn delete_entry<'a>(
        &'a self,
        path: &'a str,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, VaultResult<()>> {
        async move {
            if token.is_cancelled() {
                return Err(VaultError::Cancelled);
            }
            self.check_unlocked(path)?;
            let children = {
                let tree = self.tree.read();
                let id = tree
                    .resolve(path)
                    .ok_or_else(|| VaultError::not_found(path))?;
                if tree.is_folder(id) {
                    Some(
                        tree.children_of(id)
                            .into_iter()
                            .map(|(name, _)| name)
                            .collect::<Vec<_>>(),
                    )
                } else {
                    None
                }
            };
            let Some(children) = children else {
                return self.delete_file_at(path).await;
            };
            for name in children {
                let child = join_path(path, &name);
                self.delete_entry(&child, token).await?;
            }
            self.storage.remove_dir(Path::new(path)).await?;
            {
                let mut tree = self.tree.write();
                if let Some(id) = tree.resolve(path) {
                    let _ = tree.remove_subtree(id);
                }
            }
            self.cache.purge(path);
            self.bus.publish(ChangeEvent::DirDeleted {
                path: path.to_string(),
            });
            Ok(())
        }
        .boxed()
    }

    /// Copy a file or folder into the `target` folder under a
    /// collision-free name, tracked as a cancellable task. A failed or
    /// cancelled folder copy rolls the partial destination back out.
    pub async fn copy_to(&self, path: &str, target: &str) -> VaultResult<String> {
        let path = normalize(path);
        let target = normalize(target);

        let (is_dir, dst) = {
            let tree = self.tree.read();
            let id = tree
                .resolve(&path)
                .ok_or_else(|| VaultError::not_found(&path))?;
            let target_id = tree
                .resolve(&target)
                .ok_or_else(|| VaultError::not_found(&target))?;
            if !tree.is_folder(target_id) {
                return Err(VaultError::other(format!("not a folder: {target}")));
            }
            if id == target_id || tree.is_ancestor(id, target_id) {
                return Err(VaultError::other(format!("cannot copy {path} into itself")));
            }
            let (_, name) = split_path(&path);
            let taken: HashSet<String> = tree
                .children_of(target_id)
                .into_iter()
                .map(|(n, _)| n)
                .collect();
            let name = unique_name(name, |candidate| taken.contains(candidate));
            (tree.is_folder(id), join_path(&target, &name))
        };
        // a lock can name a path that does not exist yet, reserving it
        self.check_unlocked(&dst)?;

        let label = format!("copy {path}");
        self.tasks
            .dispatch(label, |token| async move {
                let result = if is_dir {
                    self.copy_dir(&path, &dst, &token).await
                } else {
                    self.copy_file_entry(&path, &dst, &token).await
                };
                match result {
                    Ok(()) => Ok(dst),
                    Err(e) => {
                        let created = self.exists(&dst);
                        self.rollback_copy(&dst, is_dir).await;
                        if created {
                            let event = if is_dir {
                                ChangeEvent::DirDeleted { path: dst.clone() }
                            } else {
                                ChangeEvent::FileDeleted { path: dst.clone() }
                            };
                            self.bus.publish(event);
                        }
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn copy_file_entry(
        &self,
        src: &str,
        dst: &str,
        token: &CancellationToken,
    ) -> VaultResult<()> {
        if token.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        self.storage
            .copy_file(Path::new(src), Path::new(dst))
            .await?;
        let attached = {
            let mut tree = self.tree.write();
            let (parent, name) = split_path(dst);
            match tree.resolve(parent) {
                Some(parent_id) => tree.attach(parent_id, name, NodeKind::File).map(|_| ()),
                None => Err(VaultError::not_found(parent)),
            }
        };
        attached?;
        self.cache.copy_entry(src, dst);
        self.bus.publish(ChangeEvent::FileCreated {
            path: dst.to_string(),
            content: self.cache.get(dst),
        });
        self.bus.publish(ChangeEvent::FileCopied {
            from: src.to_string(),
            to: dst.to_string(),
        });
        Ok(())
    }

    fn copy_dir<'a>(
        &'a self,
        src: &'a str,
        dst: &'a str,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, VaultResult<()>> {
        async move {
            if token.is_cancelled() {
                return Err(VaultError::Cancelled);
            }
            self.storage.create_dir(Path::new(dst)).await?;
            let attached = {
                let mut tree = self.tree.write();
                let (parent, name) = split_path(dst);
                match tree.resolve(parent) {
                    Some(parent_id) => tree.attach(parent_id, name, NodeKind::folder()).map(|_| ()),
                    None => Err(VaultError::not_found(parent)),
                }
            };
            attached?;
            self.bus.publish(ChangeEvent::DirCreated {
                path: dst.to_string(),
            });

            let children = {
                let tree = self.tree.read();
                match tree.resolve(src) {
                    Some(id) => tree.children_of(id),
                    None => Vec::new(),
                }
            };
            for (name, child_id) in children {
                let child_src = join_path(src, &name);
                let child_dst = join_path(dst, &name);
                let child_is_dir = self.tree.read().is_folder(child_id);
                if child_is_dir {
                    self.copy_dir(&child_src, &child_dst, token).await?;
                } else {
                    self.copy_file_entry(&child_src, &child_dst, token).await?;
                }
            }
            self.bus.publish(ChangeEvent::DirCopied {
                from: src.to_string(),
                to: dst.to_string(),
            });
            Ok(())
        }
        .boxed()
    }

    /// Best-effort removal of a partially copied destination. The caller
    /// keeps its original error; failures here only warn.
    async fn rollback_copy(&self, dst: &str, is_dir: bool) {
        let removed = if is_dir {
            self.storage.remove_dir_all(Path::new(dst)).await
        } else {
            self.storage.remove_file(Path::new(dst)).await
        };
        if let Err(e) = removed {
            if !e.is_not_found() {
                tracing::warn!(path = %dst, error = %e, "cleanup failed");
            }
        }
        {
            let mut tree = self.tree.write();
            if let Some(id) = tree.resolve(dst) {
                let _ = tree.remove_subtree(id);
            }
        }
        self.cache.purge(dst);
    }

    /// Rebuild the tree from storage, as after external changes.
    /// Cached content is kept.
    pub async fn refresh(&self) -> VaultResult<()> {
        let tree = scan(self.storage.as_ref()).await?;
        *self.tree.write() = tree;
        Ok(())
    }

    // ========================================================================
    // Trash
    // ========================================================================

    /// Soft-delete: relocate the entry into the trash area and record it
    /// in the manifest. Returns the trash key used for restore.
    pub async fn move_to_trash(&self, path: &str) -> VaultResult<String> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(VaultError::other("cannot trash the root"));
        }
        self.check_unlocked(&path)?;
        let (id, kind) = {
            let tree = self.tree.read();
            let id = tree
                .resolve(&path)
                .ok_or_else(|| VaultError::not_found(&path))?;
            let kind = if tree.is_folder(id) {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            (id, kind)
        };
        // a locked path inside a trashed folder would become unreachable
        if kind.is_dir() {
            let prefix = format!("{path}/");
            let locked = self.locked_paths();
            if let Some(inner) = locked.iter().find(|p| p.starts_with(&prefix)) {
                return Err(VaultError::locked(inner.as_str()));
            }
        }

        // key selection, rename and manifest append are one step on the
        // bin's side; a failure leaves the entry where it was
        let record = self.trash.stash(&path, kind).await?;
        let trash_path = TrashBin::entry_path(&record.key);

        {
            let mut tree = self.tree.write();
            let _ = tree.remove_subtree(id);
        }
        self.cache.purge(&path);
        let event = if kind.is_dir() {
            ChangeEvent::DirMoved {
                old_path: path,
                new_path: trash_path,
            }
        } else {
            ChangeEvent::FileMoved {
                old_path: path,
                new_path: trash_path,
            }
        };
        self.bus.publish(event);
        Ok(record.key)
    }

    /// Restore a trashed entry to its original path.
    pub async fn restore_trash(&self, key: &str) -> VaultResult<String> {
        let record = self
            .trash
            .find(key)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("trash entry {key}")))?;
        let dest = normalize(&record.original_path);
        self.check_unlocked(&dest)?;
        if self.exists(&dest) {
            return Err(VaultError::collision(&dest));
        }
        let (parent, _) = split_path(&dest);
        if !parent.is_empty() {
            self.storage.create_dir(Path::new(parent)).await?;
        }
        // rename and manifest removal are one step on the bin's side; a
        // failure leaves the entry in trash and still listed
        let record = self.trash.restore(key).await?;
        let trash_path = TrashBin::entry_path(key);
        self.refresh().await?;
        let event = if record.kind.is_dir() {
            ChangeEvent::DirMoved {
                old_path: trash_path,
                new_path: dest.clone(),
            }
        } else {
            ChangeEvent::FileMoved {
                old_path: trash_path,
                new_path: dest.clone(),
            }
        };
        self.bus.publish(event);
        Ok(dest)
    }

    /// Manifest records, oldest first.
    pub async fn trash_records(&self) -> VaultResult<Vec<TrashRecord>> {
        self.trash.records().await
    }
}

/// Build a tree snapshot from storage. The trash directory is not part
/// of the visible tree.
async fn scan(storage: &dyn Storage) -> VaultResult<Tree> {
    let mut tree = Tree::new();
    let root = tree.root();
    for entry in storage.list_dir(Path::new("")).await? {
        if entry.name == TRASH_DIR && entry.kind.is_dir() {
            continue;
        }
        let path = entry.name.clone();
        match entry.kind {
            EntryKind::File => {
                tree.attach(root, entry.name, NodeKind::File)?;
            }
            EntryKind::Directory => {
                let id = tree.attach(root, entry.name, NodeKind::folder())?;
                scan_into(storage, &mut tree, id, path).await?;
            }
        }
    }
    Ok(tree)
}

fn scan_into<'a>(
    storage: &'a dyn Storage,
    tree: &'a mut Tree,
    parent: NodeId,
    path: String,
) -> BoxFuture<'a, VaultResult<()>> {
    async move {
        for entry in storage.list_dir(Path::new(&path)).await? {
            let child_path = join_path(&path, &entry.name);
            match entry.kind {
                EntryKind::File => {
                    tree.attach(parent, entry.name, NodeKind::File)?;
                }
                EntryKind::Directory => {
                    let id = tree.attach(parent, entry.name, NodeKind::folder())?;
                    scan_into(storage, tree, id, child_path).await?;
                }
            }
        }
        Ok(())
    }
    .boxed()
}

//! Debounced settings persistence.
//!
//! Settings files live in the vault like any other entry, but they are
//! written far more often — every slider drag lands an update. The
//! [`SettingsStore`] absorbs that churn: updates go straight to the
//! content cache and are marked dirty; a background worker writes each
//! file back to storage once its last update is older than the debounce
//! window. `file.modified` is emitted when the write lands, not on
//! every update.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::ContentCache;
use crate::content::Content;
use crate::error::{VaultError, VaultResult};
use crate::events::{ChangeEvent, SharedChangeBus};
use crate::storage::Storage;

/// Tracks dirty settings files that need flushing to storage.
struct DirtyTracker {
    /// Paths marked dirty, with timestamp of last modification.
    files: DashMap<String, Instant>,
    /// Debounce duration.
    debounce: Duration,
}

impl DirtyTracker {
    fn new(debounce: Duration) -> Self {
        Self {
            files: DashMap::new(),
            debounce,
        }
    }

    fn mark_dirty(&self, path: &str) {
        self.files.insert(path.to_string(), Instant::now());
    }

    /// Last-update stamp for a path, if it is dirty.
    fn stamp(&self, path: &str) -> Option<Instant> {
        self.files.get(path).map(|entry| *entry.value())
    }

    fn get_flushable(&self) -> Vec<String> {
        let now = Instant::now();
        self.files
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) >= self.debounce)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn get_all(&self) -> Vec<String> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Clear a dirty mark, unless an update landed after `seen` — a
    /// newer value must stay marked so the next sweep writes it.
    fn mark_flushed(&self, path: &str, seen: Option<Instant>) {
        if let Some(seen) = seen {
            self.files.remove_if(path, |_, at| *at == seen);
        }
    }
}

/// Write-behind store for the registered settings files.
pub struct SettingsStore {
    storage: Arc<dyn Storage>,
    cache: Arc<ContentCache>,
    bus: SharedChangeBus,
    dirty: DirtyTracker,
    /// Vault paths this store owns.
    paths: Vec<String>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl SettingsStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<ContentCache>,
        bus: SharedChangeBus,
        paths: Vec<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            storage,
            cache,
            bus,
            dirty: DirtyTracker::new(debounce),
            paths,
            worker: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// The vault paths this store owns.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Load every registered file from storage into the cache.
    pub async fn preload(&self) -> VaultResult<()> {
        for path in &self.paths {
            let bytes = self.storage.read(std::path::Path::new(path)).await?;
            let name = path.rsplit('/').next().unwrap_or(path);
            let content = Content::decode(name, bytes)?;
            self.cache.insert(path.clone(), content);
        }
        Ok(())
    }

    /// Current value of a settings file, from cache.
    pub fn get(&self, path: &str) -> Option<Content> {
        self.cache.get(path)
    }

    /// Replace a settings file's value in cache and schedule a flush.
    ///
    /// Storage is not touched here; the worker writes it once the value
    /// has been stable for the debounce window.
    pub fn update(&self, path: &str, content: Content) -> VaultResult<()> {
        if !self.is_registered(path) {
            return Err(VaultError::not_found(path));
        }
        self.cache.insert(path.to_string(), content);
        self.dirty.mark_dirty(path);
        Ok(())
    }

    /// Write a single dirty path to storage now, debounce or not.
    pub async fn flush_one(&self, path: &str) -> VaultResult<()> {
        // Snapshot before reading the cache: an update landing while the
        // write below is in flight must keep its dirty mark.
        let seen = self.dirty.stamp(path);
        let Some(content) = self.cache.get(path) else {
            self.dirty.mark_flushed(path, seen);
            return Ok(());
        };
        let bytes = content.to_bytes()?;
        self.storage.write(std::path::Path::new(path), &bytes).await?;
        self.dirty.mark_flushed(path, seen);
        self.bus.publish(ChangeEvent::FileModified {
            path: path.to_string(),
        });
        tracing::debug!(path = %path, "flushed settings file");
        Ok(())
    }

    /// Flush every path whose last update is older than the debounce
    /// window.
    pub async fn flush_due(&self) {
        for path in self.dirty.get_flushable() {
            if let Err(e) = self.flush_one(&path).await {
                tracing::warn!(path = %path, error = %e, "failed to flush settings file");
            }
        }
    }

    /// Flush everything dirty immediately. Used at shutdown.
    pub async fn flush_all(&self) {
        for path in self.dirty.get_all() {
            if let Err(e) = self.flush_one(&path).await {
                tracing::warn!(path = %path, error = %e, "failed to flush settings file");
            }
        }
    }

    /// Start the background flush worker.
    ///
    /// Safe to call once; subsequent calls are no-ops.
    pub fn start_worker(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let store = Arc::clone(self);
        let token = self.shutdown_token.clone();
        let period = store.dirty.debounce.max(Duration::from_millis(50));
        *worker = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => store.flush_due().await,
                }
            }
        }));
    }

    /// Stop the worker and write out everything still dirty.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.flush_all().await;
    }
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("paths", &self.paths)
            .field("dirty", &self.dirty.files.len())
            .finish_non_exhaustive()
    }
}

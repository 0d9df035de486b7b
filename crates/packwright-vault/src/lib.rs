//! # packwright-vault
//!
//! Virtual content vault over one storage root.
//!
//! A vault:
//! - Mirrors the storage tree in memory (arena nodes, `/`-joined path addressing)
//! - Lazily caches decoded file content and keeps the cache consistent
//!   across rename/move/copy/delete
//! - Publishes one typed change event per affected entry
//! - Tracks folder-sized operations as cancellable tasks
//! - Soft-deletes into a manifest-backed trash with restore-by-key
//! - Write-behind-flushes the bootstrap settings files

pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod naming;
pub mod settings;
pub mod storage;
pub mod tasks;
pub mod trash;
pub mod tree;
pub mod vault;

pub use cache::ContentCache;
pub use config::VaultConfig;
pub use content::{Content, SemanticKind, is_image_name, semantic_kind, semantic_tag};
pub use error::{VaultError, VaultResult};
pub use events::{
    ChangeEvent, EventBus, EventMessage, HasSubject, SharedChangeBus, Subscription,
    matches_pattern, shared_change_bus,
};
pub use naming::unique_name;
pub use settings::SettingsStore;
pub use storage::{DirEntry, EntryKind, EntryMeta, LocalStorage, MemoryStorage, Storage};
pub use tasks::{TaskDispatcher, TaskRecord, TaskStatus};
pub use trash::{TRASH_DIR, TrashBin, TrashRecord};
pub use tree::{Node, NodeId, NodeKind, Tree};
pub use vault::{
    CHARACTER_DIR, GLOBAL_DIR, MODEL_CONFIG_PATH, PRESET_DIR, SETTING_PATH, TEMPLATE_DIR, Vault,
};

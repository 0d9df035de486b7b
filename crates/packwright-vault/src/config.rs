//! Vault construction options.

use std::path::PathBuf;
use std::time::Duration;

/// Options for opening a vault.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Directory holding the vault on disk.
    pub root: PathBuf,
    /// Broadcast capacity of the change bus.
    pub event_capacity: usize,
    /// How long a settings value must sit unchanged before it is
    /// written back to storage.
    pub settings_debounce: Duration,
}

impl VaultConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_settings_debounce(mut self, debounce: Duration) -> Self {
        self.settings_debounce = debounce;
        self
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            event_capacity: 1024,
            settings_debounce: Duration::from_millis(500),
        }
    }
}

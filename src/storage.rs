//! Storage adapters for the durable key-value store.
//!
//! Every piece of persisted state (entitlement cache, session credentials,
//! pending registration, backup bookkeeping) lives behind [`StorageAdapter`].
//! Keys are string-valued; structured records are stored as JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, SyncError};

/// Storage keys
pub mod keys {
    pub const USER_DATA: &str = "user_data";
    pub const AUTH_TOKEN: &str = "auth_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const IS_LOGGED_IN: &str = "is_logged_in";
    pub const EXPLICIT_CONNECTION: &str = "explicit_connection";
    pub const PREMIUM_USER: &str = concat!("@prayer_app_", "premium_user");
    pub const PREMIUM_CATALOG: &str = concat!("@prayer_app_", "premium_catalog");
    pub const PREMIUM_CONTENT: &str = concat!("@prayer_app_", "premium_content");
    pub const PREMIUM_STATS: &str = concat!("@prayer_app_", "premium_stats");
    pub const PENDING_REGISTRATION: &str = "pending_registration";
    pub const LAST_BACKUP_TIME: &str = "lastBackupTime";
    pub const AUTO_BACKUP_ENABLED: &str = "autoBackupEnabled";
    pub const FAVORITES: &str = concat!("@prayer_app_", "favorites");
    pub const USER_FIRST_NAME: &str = "userFirstName";
    pub const CUSTOM_SETTINGS: &str = "customSettings";

    /// Premium caches wiped by a forced logout, in addition to the session keys.
    pub const PREMIUM_CACHES: &[&str] = &[PREMIUM_USER, PREMIUM_CATALOG, PREMIUM_CONTENT, PREMIUM_STATS];
}

/// Flag values are persisted as the strings `"true"` / `"false"`.
pub fn flag_value(enabled: bool) -> &'static str {
    if enabled {
        "true"
    } else {
        "false"
    }
}

/// Storage adapter trait for custom storage implementations
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value by key
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value by key
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key
    async fn clear(&self) -> Result<()>;

    /// True only when the stored flag is exactly `"true"`.
    async fn get_flag(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.as_deref() == Some("true"))
    }
}

/// In-memory storage, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .read()
            .map_err(|_| SyncError::storage("memory storage lock poisoned"))?;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SyncError::storage("memory storage lock poisoned"))?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SyncError::storage("memory storage lock poisoned"))?;
        data.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SyncError::storage("memory storage lock poisoned"))?;
        data.clear();
        Ok(())
    }
}

/// File-based storage adapter
///
/// Stores every key in `adhan-sync.json` within the specified directory and
/// rewrites the whole file after each mutation.
pub struct FileStorage {
    path: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or create) the store in `storage_dir`, which must already exist.
    pub fn open(storage_dir: &Path) -> Result<Self> {
        if !storage_dir.is_dir() {
            return Err(SyncError::storage(format!(
                "storage directory does not exist: {}",
                storage_dir.display()
            )));
        }

        let path = storage_dir.join("adhan-sync.json");

        let cache = if path.exists() {
            let contents =
                std::fs::read_to_string(&path).map_err(|e| SyncError::storage(e.to_string()))?;
            match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Storage file is corrupt, starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    fn save(&self, cache: &HashMap<String, String>) -> Result<()> {
        let contents = serde_json::to_string_pretty(cache)?;
        std::fs::write(&self.path, contents).map_err(|e| SyncError::storage(e.to_string()))
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| SyncError::storage("file storage lock poisoned"))?;
        let mut next = cache.clone();
        f(&mut next);
        self.save(&next)?;
        *cache = next;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let cache = self
            .cache
            .read()
            .map_err(|_| SyncError::storage("file storage lock poisoned"))?;
        Ok(cache.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|cache| {
            cache.insert(key.to_string(), value.to_string());
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.mutate(|cache| {
            cache.remove(key);
        })
    }

    async fn clear(&self) -> Result<()> {
        self.mutate(|cache| cache.clear())
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .finish()
    }
}

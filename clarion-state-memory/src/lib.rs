#![deny(missing_docs)]
//! In-memory implementation of clarion's [`BlacklistStore`] trait.
//!
//! Uses a `HashMap` keyed by provider behind a `RwLock`. Entries live for
//! the lifetime of the process.

use async_trait::async_trait;
use clarion_types::{BlacklistEntry, BlacklistStore, StorageError};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory blacklist store.
///
/// Suitable for testing and single-process use where rejections need not
/// survive a restart.
pub struct MemoryBlacklistStore {
    data: RwLock<HashMap<String, Vec<BlacklistEntry>>>,
}

impl MemoryBlacklistStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBlacklistStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlacklistStore for MemoryBlacklistStore {
    async fn get(&self, provider_key: &str) -> Result<Vec<BlacklistEntry>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(provider_key).cloned().unwrap_or_default())
    }

    async fn put(&self, entry: BlacklistEntry) -> Result<bool, StorageError> {
        let mut data = self.data.write().await;
        let entries = data.entry(entry.provider_key.clone()).or_default();
        if entries.iter().any(|existing| existing.same_key(&entry)) {
            return Ok(false);
        }
        entries.push(entry);
        Ok(true)
    }

    async fn clear(&self, provider_key: Option<&str>) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        match provider_key {
            Some(key) => {
                data.remove(key);
            }
            None => data.clear(),
        }
        Ok(())
    }
}

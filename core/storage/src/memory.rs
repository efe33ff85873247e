//! In-memory vault store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::provider::{validate_key, StoredEntry, VaultStore, WriteCondition};
use keyrelay_common::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, StoredEntry>,
    last_revision: u64,
}

/// In-memory vault store.
///
/// Useful for testing and for clients without durable storage. All data is
/// lost on drop. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Storage("Memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl VaultStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, key: &str) -> Result<Option<StoredEntry>> {
        validate_key(key)?;
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner.entries.get(key).cloned())
    }

    async fn write(&self, key: &str, data: Vec<u8>, condition: WriteCondition) -> Result<u64> {
        validate_key(key)?;
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;

        let current = inner.entries.get(key).map(|e| e.revision);
        condition.check(key, current)?;

        inner.last_revision += 1;
        let revision = inner.last_revision;
        inner
            .entries
            .insert(key.to_string(), StoredEntry { data, revision });

        Ok(revision)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        Ok(inner.entries.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        let mut keys: Vec<String> = inner.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

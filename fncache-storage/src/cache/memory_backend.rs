//! Process-local cache backend.

use std::collections::HashMap;
use std::sync::RwLock;

use fncache_core::{BackendError, BackendKind, CacheEntry, CacheKey, FnCacheResult};

use super::traits::CacheBackend;

/// In-memory map from key to entry. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    fn contains(&self, key: &CacheKey) -> FnCacheResult<bool> {
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.contains_key(key.as_str()))
    }

    fn get(&self, key: &CacheKey) -> FnCacheResult<CacheEntry> {
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        entries.get(key.as_str()).cloned().ok_or_else(|| {
            BackendError::NotFound {
                key: key.to_string(),
            }
            .into()
        })
    }

    fn set(&self, key: &CacheKey, entry: &CacheEntry) -> FnCacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> FnCacheResult<bool> {
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.remove(key.as_str()).is_some())
    }
}

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::warn;

use super::entry::CacheEntry;
use super::key::CacheKey;

/// In-process tier. Whole entries are swapped under the write lock, so a
/// reader sees either the old or the new value.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("Memory cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("Memory cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.read().get(key).cloned()
    }

    /// Replace whatever is stored for the key.
    pub fn insert(&self, entry: CacheEntry) {
        self.write().insert(entry.key.clone(), entry);
    }

    /// Store `entry` only if the key is empty; returns the entry now held.
    pub fn insert_if_absent(&self, entry: CacheEntry) -> CacheEntry {
        self.write()
            .entry(entry.key.clone())
            .or_insert(entry)
            .clone()
    }

    pub fn remove(&self, key: &CacheKey) {
        self.write().remove(key);
    }
}

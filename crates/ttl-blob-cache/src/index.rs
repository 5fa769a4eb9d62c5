//! In-memory index of cached entries, keyed by sanitized key

use crate::types::CacheEntry;
use dashmap::DashMap;

/// Concurrent map from sanitized key to entry metadata.
///
/// Safe to share between callers and the background sweeper without any
/// external locking. Entries are stored by value and replaced wholesale.
#[derive(Debug, Default)]
pub struct EntryIndex {
    entries: DashMap<String, CacheEntry>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Install `entry`, returning the entry it replaced.
    pub fn upsert(&self, key: impl Into<String>, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(key.into(), entry)
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Remove `key` only if it still maps to `expected`.
    ///
    /// Lets the sweeper evict an entry it saw in a snapshot without
    /// clobbering a newer write for the same key.
    pub fn remove_if_same(&self, key: &str, expected: &CacheEntry) -> Option<CacheEntry> {
        self.entries
            .remove_if(key, |_, current| current == expected)
            .map(|(_, entry)| entry)
    }

    /// Point-in-time copy of all entries.
    pub fn snapshot(&self) -> Vec<(String, CacheEntry)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Cache types

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata for a cached blob entry.
///
/// Entries are never mutated once installed; rewriting a key installs a new
/// value in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    origin: DateTime<Utc>,
    ttl: Duration,
    file_name: String,
}

impl CacheEntry {
    pub fn new(origin: DateTime<Utc>, ttl: Duration, file_name: impl Into<String>) -> Self {
        Self {
            origin,
            ttl,
            file_name: file_name.into(),
        }
    }

    /// Build the on-disk file name for a sanitized key: `<key>.<ttl seconds>`.
    pub fn file_name_for(sanitized_key: &str, ttl: Duration) -> String {
        format!("{}.{}", sanitized_key, ttl_to_secs(ttl))
    }

    /// When the write that produced this entry completed (or the file's
    /// creation time, for entries rebuilt at startup).
    pub fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// `origin + ttl`, or `None` if that overflows the calendar.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = TimeDelta::from_std(self.ttl).ok()?;
        self.origin.checked_add_signed(ttl)
    }

    /// An entry is expired once `origin + ttl` lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| expires < now)
    }
}

/// TTL in whole seconds, rounded to the nearest second.
pub fn ttl_to_secs(ttl: Duration) -> u64 {
    ttl.as_secs_f64().round() as u64
}

/// Callback invoked after a background write lands on disk and in the index.
pub type OnComplete = Box<dyn FnOnce(&CacheEntry) + Send + 'static>;

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub pending_writes: usize,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub collisions: u64,
    pub write_failures: u64,
    pub evictions: u64,
}

//! Rebuilding the entry index from files already in the cache root

use crate::index::EntryIndex;
use crate::store::{FileStore, ListedFile};
use crate::types::CacheEntry;
use chrono::Utc;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Split a cache file name into its sanitized key and TTL.
///
/// The key is everything before the last `.`; the suffix after it is the
/// TTL in seconds. `abc.3600` yields `("abc", Some(3600s))`, while `abc.tmp`
/// yields `("abc", None)` so the caller applies its default TTL. A name
/// without any `.` is all key. Returns `None` for names with an empty key.
pub fn parse_file_name(name: &str) -> Option<(&str, Option<Duration>)> {
    let (key, ttl) = match name.rsplit_once('.') {
        Some((stem, suffix)) => (stem, suffix.parse::<u64>().ok().map(Duration::from_secs)),
        None => (name, None),
    };
    if key.is_empty() {
        return None;
    }
    Some((key, ttl))
}

/// Populate `index` from the files directly under `root`.
///
/// Malformed names fall back to `default_ttl`; names that cannot be used
/// are skipped. Returns the number of entries installed.
pub async fn rebuild_index(
    store: &dyn FileStore,
    root: &Path,
    index: &EntryIndex,
    default_ttl: Duration,
) -> io::Result<usize> {
    let files = store.list_files(root).await?;
    let mut installed = 0;
    let mut defaulted = 0;

    for ListedFile { name, created_at } in files {
        let Some((key, ttl)) = parse_file_name(&name) else {
            warn!(file = %name, "Skipping unrecognized file in cache root");
            continue;
        };
        let ttl = ttl.unwrap_or_else(|| {
            defaulted += 1;
            default_ttl
        });
        let origin = created_at.unwrap_or_else(Utc::now);
        let entry = CacheEntry::new(origin, ttl, name.as_str());

        match index.lookup(key) {
            Some(existing) if existing.origin() >= origin => {
                warn!(key, kept = existing.file_name(), ignored = %name, "Duplicate cache file for key");
            }
            Some(existing) => {
                warn!(key, kept = %name, ignored = existing.file_name(), "Duplicate cache file for key");
                index.upsert(key, entry);
            }
            None => {
                index.upsert(key, entry);
                installed += 1;
            }
        }
    }

    info!(
        root = ?root,
        entries = installed,
        default_ttl_applied = defaulted,
        "Rebuilt cache index"
    );
    Ok(installed)
}

//! Background eviction of expired entries

use crate::cache::Shared;
use crate::lane::WriteLanes;
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Evict every entry whose `origin + ttl` lies before `now`.
///
/// Each eviction runs as a job on the write lane owning its key, and only
/// removes the entry if the index still holds the exact value seen in the
/// snapshot, so a concurrent remove or rewrite wins. A failed file delete is
/// logged and the sweep carries on. Returns the number of entries evicted.
pub(crate) async fn sweep_expired(
    shared: &Shared,
    lanes: &WriteLanes,
    now: DateTime<Utc>,
) -> usize {
    let pending: Vec<_> = shared
        .index
        .snapshot()
        .into_iter()
        .filter(|(_, entry)| entry.is_expired_at(now))
        .map(|(key, entry)| lanes.evict(key, entry))
        .collect();

    let mut evicted = 0;
    for rx in pending {
        if rx.await.unwrap_or(false) {
            evicted += 1;
        }
    }

    shared
        .counters
        .evictions
        .fetch_add(evicted as u64, Ordering::Relaxed);
    evicted
}

/// Spawn the background sweeper: one sweep after `delay`, then one per
/// `interval` if given. Holds only a weak reference to the cache state so
/// it never keeps a dropped cache alive.
pub(crate) fn spawn(
    shared: Weak<Shared>,
    lanes: WriteLanes,
    delay: Duration,
    interval: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        loop {
            let Some(strong) = shared.upgrade() else {
                return;
            };
            let evicted = sweep_expired(&strong, &lanes, Utc::now()).await;
            if evicted > 0 {
                info!(evicted, "Cache sweep finished");
            }
            drop(strong);

            match interval {
                Some(period) => tokio::time::sleep(period).await,
                None => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlobCache;
    use crate::config::CacheConfig;
    use crate::types::CacheEntry;
    use chrono::TimeDelta;
    use tempfile::tempdir;

    fn manual_sweep_config() -> CacheConfig {
        CacheConfig {
            sweep_delay: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_expired_entries() {
        let dir = tempdir().unwrap();
        let cache = BlobCache::open(dir.path(), manual_sweep_config()).await.unwrap();

        assert!(cache.insert("old", b"stale".to_vec(), Duration::from_secs(1)).await);
        assert!(cache.insert("fresh", b"live".to_vec(), Duration::from_secs(3600)).await);

        let later = Utc::now() + TimeDelta::seconds(10);
        let evicted = cache.sweep_at(later).await;

        assert_eq!(evicted, 1);
        assert!(!cache.exists("old"));
        assert!(!dir.path().join("old.1").exists());
        assert!(cache.exists("fresh"));
        assert!(dir.path().join("fresh.3600").exists());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_sweep_survives_missing_file() {
        let dir = tempdir().unwrap();
        let cache = BlobCache::open(dir.path(), manual_sweep_config()).await.unwrap();

        assert!(cache.insert("a", b"1".to_vec(), Duration::from_secs(1)).await);
        assert!(cache.insert("b", b"2".to_vec(), Duration::from_secs(1)).await);
        std::fs::remove_file(dir.path().join("a.1")).unwrap();

        let later = Utc::now() + TimeDelta::seconds(10);
        assert_eq!(cache.sweep_at(later).await, 2);
        assert!(!dir.path().join("b.1").exists());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_entry_replaced_since_snapshot() {
        let dir = tempdir().unwrap();
        let cache = BlobCache::open(dir.path(), manual_sweep_config()).await.unwrap();
        let shared = cache.shared();

        let stale = CacheEntry::new(Utc::now() - TimeDelta::hours(2), Duration::from_secs(60), "k.60");
        shared.index.upsert("k", stale.clone());
        let replacement = CacheEntry::new(Utc::now(), Duration::from_secs(60), "k.60");
        shared.index.upsert("k", replacement.clone());

        assert_eq!(cache.sweep_at(Utc::now()).await, 0);
        assert_eq!(shared.index.lookup("k"), Some(replacement));
    }

    #[tokio::test]
    async fn test_background_sweep_runs_on_interval() {
        let dir = tempdir().unwrap();
        let config = CacheConfig {
            sweep_delay: Duration::from_millis(10),
            sweep_interval: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let cache = BlobCache::open(dir.path(), config).await.unwrap();

        // Let the first sweep pass, then write an entry that expires at once.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.insert("k", b"gone soon".to_vec(), Duration::ZERO).await);

        let mut evicted = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !cache.exists("k") {
                evicted = true;
                break;
            }
        }
        assert!(evicted, "periodic sweep should evict the expired entry");
        assert!(!dir.path().join("k.0").exists());
    }

    #[tokio::test]
    async fn test_startup_sweep_evicts_expired_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("expired.0"), b"x").unwrap();
        std::fs::write(dir.path().join("kept.3600"), b"y").unwrap();

        let config = CacheConfig {
            sweep_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let cache = BlobCache::open(dir.path(), config).await.unwrap();

        let mut evicted = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !cache.exists("expired") {
                evicted = true;
                break;
            }
        }
        assert!(evicted);
        assert!(!dir.path().join("expired.0").exists());
        assert!(cache.exists("kept"));
    }
}

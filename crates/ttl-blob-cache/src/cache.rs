//! Directory-backed blob cache with per-entry TTL

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::index::EntryIndex;
use crate::lane::{WriteJob, WriteLanes};
use crate::pending::PendingWrites;
use crate::reconstruct::rebuild_index;
use crate::sanitize::{FileNameSanitizer, KeySanitizer};
use crate::store::{FileStore, TokioFileStore};
use crate::sweeper;
use crate::types::{CacheEntry, CacheStats, OnComplete};
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub collisions: AtomicU64,
    pub write_failures: AtomicU64,
    pub evictions: AtomicU64,
}

/// State shared between the cache handle, the write lanes and the sweeper.
pub(crate) struct Shared {
    pub root: PathBuf,
    pub config: CacheConfig,
    pub index: EntryIndex,
    pub pending: PendingWrites,
    pub store: Arc<dyn FileStore>,
    /// Writes hold this shared; `clear` holds it exclusively while it
    /// replaces the root directory.
    pub io_gate: RwLock<()>,
    pub counters: Counters,
}

impl Shared {
    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

/// A persistent blob cache rooted at one directory.
///
/// Writes are fire-and-forget: [`BlobCache::add_if_not_pending`] registers
/// the key as pending and queues the write on a serial lane, returning
/// immediately. Only one write per key may be in flight; a second attempt
/// is rejected and logged. Each entry carries its own TTL, encoded in the
/// file name, and expired entries are purged by a background sweep.
pub struct BlobCache {
    shared: Arc<Shared>,
    sanitizer: Arc<dyn KeySanitizer>,
    lanes: WriteLanes,
    sweeper: JoinHandle<()>,
    closed: AtomicBool,
}

impl BlobCache {
    /// Open the cache at `root` with the default sanitizer and file store.
    pub async fn open(root: impl Into<PathBuf>, config: CacheConfig) -> Result<Self> {
        Self::open_with(
            root,
            config,
            Arc::new(FileNameSanitizer),
            Arc::new(TokioFileStore),
        )
        .await
    }

    /// Open the cache with explicit collaborators.
    ///
    /// Creates `root` if needed, rebuilds the index from the files already
    /// in it, starts the write lanes and schedules the sweeper. Must be
    /// called from within a tokio runtime.
    pub async fn open_with(
        root: impl Into<PathBuf>,
        config: CacheConfig,
        sanitizer: Arc<dyn KeySanitizer>,
        store: Arc<dyn FileStore>,
    ) -> Result<Self> {
        config.validate()?;
        let root = root.into();

        store
            .create_dir_all(&root)
            .await
            .map_err(|e| CacheError::structural(&root, e))?;

        let index = EntryIndex::new();
        rebuild_index(store.as_ref(), &root, &index, config.default_ttl).await?;

        let shared = Arc::new(Shared {
            root,
            config,
            index,
            pending: PendingWrites::new(),
            store,
            io_gate: RwLock::new(()),
            counters: Counters::default(),
        });

        let lanes = WriteLanes::spawn(shared.config.write_lanes, shared.clone());
        let sweeper = sweeper::spawn(
            Arc::downgrade(&shared),
            lanes.clone(),
            shared.config.sweep_delay,
            shared.config.sweep_interval,
        );

        info!(
            cache_dir = ?shared.root,
            entries = shared.index.len(),
            write_lanes = shared.config.write_lanes,
            "Cache initialized"
        );

        Ok(Self {
            shared,
            sanitizer,
            lanes,
            sweeper,
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    fn sanitize(&self, key: &str) -> String {
        self.sanitizer.sanitize(key)
    }

    /// Queue a write of `bytes` under `key` unless a write for that key is
    /// already in flight.
    ///
    /// Returns once the write is queued. Returns `false` if it was rejected,
    /// either as a collision or because the cache is shut down; the bytes
    /// are dropped in that case. Failures while writing are logged, never
    /// reported back. `on_complete` runs on the lane after the entry is
    /// installed.
    pub fn add_if_not_pending(
        &self,
        key: &str,
        bytes: Vec<u8>,
        ttl: Duration,
        on_complete: Option<OnComplete>,
    ) -> bool {
        self.enqueue(key, bytes, ttl, on_complete, None)
    }

    /// Queue a write like [`BlobCache::add_if_not_pending`] and wait for it
    /// to settle. Returns `true` only if this call's bytes reached the disk
    /// and the index.
    pub async fn insert(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> bool {
        let (tx, rx) = oneshot::channel();
        if !self.enqueue(key, bytes, ttl, None, Some(tx)) {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    fn enqueue(
        &self,
        key: &str,
        bytes: Vec<u8>,
        ttl: Duration,
        on_complete: Option<OnComplete>,
        done: Option<oneshot::Sender<bool>>,
    ) -> bool {
        if self.closed.load(Ordering::Acquire) {
            warn!(key, "Cache is shut down, dropping write");
            return false;
        }

        let key = self.sanitize(key);
        if !self.shared.pending.try_mark(&key) {
            self.shared.counters.collisions.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, "Cache write collision, a write for this key is already pending");
            return false;
        }

        let job = WriteJob {
            key,
            bytes,
            ttl,
            on_complete,
            done,
        };
        match self.lanes.submit(job) {
            Ok(()) => true,
            Err(job) => {
                self.shared.pending.unmark(&job.key);
                error!(key = %job.key, "Write lane is closed, dropping write");
                false
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.shared.index.lookup(key);
        let counter = if entry.is_some() {
            &self.shared.counters.hits
        } else {
            &self.shared.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if self.shared.config.verbose {
            debug!(key = %key, hit = entry.is_some(), "Cache lookup");
        }
        entry
    }

    /// Whether `key` is in the index. Does not wait for a pending write.
    pub fn exists(&self, key: &str) -> bool {
        self.lookup(&self.sanitize(key)).is_some()
    }

    /// The index entry for `key`. Does not wait for a pending write.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        self.lookup(&self.sanitize(key))
    }

    /// Path of the backing file for `key`. Does not wait for a pending
    /// write, and the file may already have been evicted.
    pub fn get_file_path(&self, key: &str) -> Option<PathBuf> {
        self.lookup(&self.sanitize(key))
            .map(|entry| self.shared.path_of(entry.file_name()))
    }

    /// Open the cached blob for `key` for reading.
    ///
    /// Waits for any pending write on the key first. A missing entry or a
    /// file that cannot be opened both yield `None`.
    pub async fn try_get_stream(&self, key: &str) -> Option<File> {
        let key = self.sanitize(key);
        self.shared.pending.wait_until_clear(&key).await;

        let entry = self.lookup(&key)?;
        let path = self.shared.path_of(entry.file_name());
        match self.shared.store.open_read(&path).await {
            Ok(file) => Some(file),
            Err(e) => {
                if self.shared.config.verbose {
                    debug!(key = %key, path = ?path, error = %e, "Cached file could not be opened");
                }
                None
            }
        }
    }

    /// Read the whole blob for `key`, waiting for a pending write first.
    pub async fn read(&self, key: &str) -> Option<Vec<u8>> {
        let mut file = self.try_get_stream(key).await?;
        let mut data = Vec::new();
        match file.read_to_end(&mut data).await {
            Ok(_) => Some(data),
            Err(e) => {
                warn!(key, error = %e, "Failed to read cached file");
                None
            }
        }
    }

    /// Remove `key` and its file, after any pending write on it settles.
    /// Returns whether an entry was removed.
    pub async fn remove(&self, key: &str) -> bool {
        let key = self.sanitize(key);
        self.shared.pending.wait_until_clear(&key).await;

        let Some(entry) = self.shared.index.remove(&key) else {
            return false;
        };

        let path = self.shared.path_of(entry.file_name());
        match self.shared.store.remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, path = ?path, error = %e, "Failed to delete cache file"),
        }
        if self.shared.config.verbose {
            debug!(key = %key, "Removed cache entry");
        }
        true
    }

    /// Drop every entry and recreate an empty cache root.
    ///
    /// Waits until no write is in flight anywhere in the cache, then holds
    /// off new writes until the root has been replaced. Failing to delete or
    /// recreate the root is returned as [`CacheError::Structural`].
    pub async fn clear(&self) -> Result<()> {
        self.shared.pending.wait_until_idle().await;
        let _gate = self.shared.io_gate.write().await;

        let root = &self.shared.root;
        match self.shared.store.remove_dir_all(root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::structural(root, e)),
        }
        self.shared
            .store
            .create_dir_all(root)
            .await
            .map_err(|e| CacheError::structural(root, e))?;

        let dropped = self.shared.index.len();
        self.shared.index.clear();
        info!(cache_dir = ?root, dropped, "Cache cleared");
        Ok(())
    }

    /// Run an eviction sweep now. Returns the number of entries evicted.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    pub(crate) async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        sweeper::sweep_expired(&self.shared, &self.lanes, now).await
    }

    /// Wait until every write queued before this call has settled.
    pub async fn flush(&self) {
        self.lanes.flush().await;
    }

    /// Stop accepting writes, drain the ones already queued and stop the
    /// background sweeper.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flush().await;
        self.sweeper.abort();
        info!(cache_dir = ?self.shared.root, "Cache shut down");
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.shared.counters;
        CacheStats {
            entries: self.shared.index.len(),
            pending_writes: self.shared.pending.len(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            writes: counters.writes.load(Ordering::Relaxed),
            collisions: counters.collisions.load(Ordering::Relaxed),
            write_failures: counters.write_failures.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BlobCache {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

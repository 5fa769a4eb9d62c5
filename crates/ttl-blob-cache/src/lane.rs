//! Serial write lanes
//!
//! Every accepted write is queued on a lane and executed by that lane's
//! worker task, one job at a time, in submission order. With a single lane
//! (the default) no two writes ever touch the file system concurrently and
//! writes complete in global enqueue order. With several lanes, keys are
//! sharded by hash, so writes to one key stay ordered while unrelated keys
//! proceed in parallel.
//!
//! Evictions of expired entries run on the same lane as writes to their key,
//! so an eviction can never interleave with a rewrite of that key.

use crate::cache::Shared;
use crate::types::{ttl_to_secs, CacheEntry, OnComplete};
use chrono::Utc;
use futures::FutureExt;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// A write accepted by the pending-write tracker, waiting for its lane.
pub(crate) struct WriteJob {
    /// Sanitized key; already marked pending
    pub key: String,
    pub bytes: Vec<u8>,
    pub ttl: Duration,
    pub on_complete: Option<OnComplete>,
    /// Signalled with the outcome after the pending mark is cleared
    pub done: Option<oneshot::Sender<bool>>,
}

/// Removal of an expired entry, seen by the sweeper in an index snapshot.
struct EvictJob {
    key: String,
    entry: CacheEntry,
    done: oneshot::Sender<bool>,
}

enum LaneMessage {
    Write(WriteJob),
    Evict(EvictJob),
    Flush(oneshot::Sender<()>),
}

/// Handles to the lane workers. The lanes close once every handle is
/// dropped; workers finish whatever is already queued and exit.
#[derive(Clone)]
pub(crate) struct WriteLanes {
    senders: Vec<mpsc::UnboundedSender<LaneMessage>>,
}

impl WriteLanes {
    /// Spawn `count` lane workers on the current tokio runtime.
    pub fn spawn(count: usize, shared: Arc<Shared>) -> Self {
        let senders = (0..count.max(1))
            .map(|lane| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_lane(lane, rx, shared.clone()));
                tx
            })
            .collect();
        Self { senders }
    }

    fn lane_for(&self, key: &str) -> usize {
        if self.senders.len() == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Append `job` to its lane. On failure the job is handed back so the
    /// caller can release its pending mark.
    pub fn submit(&self, job: WriteJob) -> Result<(), WriteJob> {
        let lane = self.lane_for(&job.key);
        match self.senders[lane].send(LaneMessage::Write(job)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(LaneMessage::Write(job))) => Err(job),
            Err(_) => unreachable!("submitted a write"),
        }
    }

    /// Queue eviction of `entry` on the lane owning `key`. The receiver
    /// resolves to `true` if the entry was still current and got removed,
    /// or errors if the lane is closed.
    pub fn evict(&self, key: String, entry: CacheEntry) -> oneshot::Receiver<bool> {
        let (done, rx) = oneshot::channel();
        let lane = self.lane_for(&key);
        // A closed lane drops the job, and with it `done`.
        let _ = self.senders[lane].send(LaneMessage::Evict(EvictJob { key, entry, done }));
        rx
    }

    /// Wait until every job queued before this call has settled.
    pub async fn flush(&self) {
        let mut waiters = Vec::with_capacity(self.senders.len());
        for sender in &self.senders {
            let (tx, rx) = oneshot::channel();
            if sender.send(LaneMessage::Flush(tx)).is_ok() {
                waiters.push(rx);
            }
        }
        for rx in waiters {
            let _ = rx.await;
        }
    }
}

async fn run_lane(lane: usize, mut rx: mpsc::UnboundedReceiver<LaneMessage>, shared: Arc<Shared>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            LaneMessage::Write(job) => {
                let key = job.key.clone();
                // A panicking store must not take the lane down with it.
                if AssertUnwindSafe(execute(&shared, job))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    shared.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                    error!(lane, key = %key, "Cache write panicked");
                }
            }
            LaneMessage::Evict(job) => {
                let key = job.key.clone();
                if AssertUnwindSafe(evict(&shared, job))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!(lane, key = %key, "Cache eviction panicked");
                }
            }
            LaneMessage::Flush(tx) => {
                let _ = tx.send(());
            }
        }
    }
    debug!(lane, "Write lane closed");
}

/// Clears the pending mark however the write ends, unwinding included.
struct PendingGuard<'a> {
    shared: &'a Shared,
    key: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.unmark(self.key);
    }
}

async fn execute(shared: &Shared, job: WriteJob) {
    let WriteJob {
        key,
        bytes,
        ttl,
        on_complete,
        done,
    } = job;

    let succeeded = {
        let _pending = PendingGuard {
            shared,
            key: &key,
        };
        // Held for the duration of the disk write so `clear` cannot swap the
        // root directory out from under it.
        let _gate = shared.io_gate.read().await;

        match write_entry(shared, &key, &bytes, ttl).await {
            Ok(entry) => {
                shared.counters.writes.fetch_add(1, Ordering::Relaxed);
                if shared.config.verbose {
                    debug!(key = %key, file = entry.file_name(), size = bytes.len(), "Cached blob");
                }
                if let Some(callback) = on_complete {
                    if panic::catch_unwind(AssertUnwindSafe(|| callback(&entry))).is_err() {
                        error!(key = %key, "Write completion callback panicked");
                    }
                }
                true
            }
            Err(e) => {
                shared.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(key = %key, error = %e, "Background cache write failed");
                false
            }
        }
    };

    if let Some(done) = done {
        let _ = done.send(succeeded);
    }
}

async fn write_entry(
    shared: &Shared,
    key: &str,
    bytes: &[u8],
    ttl: Duration,
) -> io::Result<CacheEntry> {
    let previous = shared.index.lookup(key);
    if let Some(previous) = &previous {
        let old_path = shared.path_of(previous.file_name());
        match shared.store.remove_file(&old_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(key = %key, path = ?old_path, error = %e, "Failed to delete replaced cache file")
            }
        }
    }

    // The file name only carries whole seconds; keep the index in step so a
    // restart rebuilds the same TTL.
    let ttl = Duration::from_secs(ttl_to_secs(ttl));
    let file_name = CacheEntry::file_name_for(key, ttl);
    let path = shared.path_of(&file_name);

    if let Err(e) = shared.store.write_bytes(&path, bytes).await {
        // The old file is already gone; don't leave the index pointing at it.
        if let Some(previous) = &previous {
            shared.index.remove_if_same(key, previous);
        }
        let _ = shared.store.remove_file(&path).await;
        return Err(e);
    }

    let entry = CacheEntry::new(Utc::now(), ttl, file_name);
    shared.index.upsert(key, entry.clone());
    Ok(entry)
}

async fn evict(shared: &Shared, job: EvictJob) {
    let EvictJob { key, entry, done } = job;
    let _gate = shared.io_gate.read().await;

    // A rewrite or remove since the snapshot wins.
    let removed = shared.index.remove_if_same(&key, &entry).is_some();
    if removed {
        let path = shared.path_of(entry.file_name());
        match shared.store.remove_file(&path).await {
            Ok(()) => {
                if shared.config.verbose {
                    debug!(key = %key, file = entry.file_name(), "Evicted expired cache entry");
                }
            }
            Err(e) => warn!(key = %key, path = ?path, error = %e, "Failed to delete expired cache file"),
        }
    }
    let _ = done.send(removed);
}

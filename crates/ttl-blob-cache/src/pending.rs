//! Tracking of keys with a write in flight

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

/// Concurrent set of sanitized keys that currently have a write in flight.
///
/// Each marked key owns a `watch` sender that is dropped on unmark, which
/// wakes every waiter subscribed to it. A second channel carries the number
/// of marked keys so `wait_until_idle` can wait for the whole set to drain.
#[derive(Debug)]
pub struct PendingWrites {
    keys: DashMap<String, watch::Sender<()>>,
    in_flight: watch::Sender<usize>,
}

impl Default for PendingWrites {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingWrites {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            keys: DashMap::new(),
            in_flight,
        }
    }

    /// Mark `key` as pending. Returns `false` if it already was.
    pub fn try_mark(&self, key: &str) -> bool {
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                // Count first so the set is never larger than the count.
                self.in_flight.send_modify(|n| *n += 1);
                let (tx, _) = watch::channel(());
                slot.insert(tx);
                true
            }
        }
    }

    /// Clear the pending mark for `key`, waking anyone waiting on it.
    pub fn unmark(&self, key: &str) {
        if self.keys.remove(key).is_some() {
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Wait until `key` is no longer marked. Returns immediately if it
    /// is not pending.
    pub async fn wait_until_clear(&self, key: &str) {
        loop {
            // The map guard must be released before awaiting.
            let mut rx = match self.keys.get(key) {
                Some(tx) => tx.subscribe(),
                None => return,
            };
            // Errors once the sender is dropped by `unmark`, which is the
            // only thing this waits for.
            while rx.changed().await.is_ok() {}
        }
    }

    /// Wait until no key at all is marked.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_mark_collides() {
        let pending = PendingWrites::new();
        assert!(pending.try_mark("k"));
        assert!(!pending.try_mark("k"));
        assert!(pending.try_mark("other"));
        assert_eq!(pending.len(), 2);

        pending.unmark("k");
        assert!(!pending.is_pending("k"));
        assert!(pending.try_mark("k"));
    }

    #[test]
    fn test_unmark_unknown_key_is_noop() {
        let pending = PendingWrites::new();
        pending.unmark("never-marked");
        assert!(pending.is_empty());
        assert_eq!(*pending.in_flight.borrow(), 0);
    }

    #[tokio::test]
    async fn test_wait_until_clear_returns_when_not_pending() {
        let pending = PendingWrites::new();
        tokio::time::timeout(Duration::from_secs(1), pending.wait_until_clear("k"))
            .await
            .expect("should not wait for an unmarked key");
    }

    #[tokio::test]
    async fn test_wait_until_clear_wakes_on_unmark() {
        let pending = Arc::new(PendingWrites::new());
        assert!(pending.try_mark("k"));

        let waiter = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.wait_until_clear("k").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pending.unmark("k");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_idle_waits_for_all_keys() {
        let pending = Arc::new(PendingWrites::new());
        assert!(pending.try_mark("a"));
        assert!(pending.try_mark("b"));

        let waiter = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.wait_until_idle().await })
        };

        pending.unmark("a");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pending.unmark("b");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("idle waiter should wake")
            .unwrap();
    }
}

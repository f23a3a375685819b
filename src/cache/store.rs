#![forbid(unsafe_code)]

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::{CacheEntry, EntityKind, EntryStatus};
use crate::records::CacheItem;

/// Shared handle to one cache entry.
///
/// The entry lock is a plain mutex and must never be held across an await;
/// every access goes through [`read`](Self::read) or
/// [`update`](Self::update), and `update` wakes anyone blocked in
/// [`wait_for`](Self::wait_for).
pub struct EntryHandle<T> {
    key: String,
    kind: EntityKind,
    state: Mutex<CacheEntry<T>>,
    changed: Notify,
}

impl<T: CacheItem> EntryHandle<T> {
    fn new(key: String, kind: EntityKind) -> Self {
        Self {
            key,
            kind,
            state: Mutex::new(CacheEntry::new()),
            changed: Notify::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn read<R>(&self, f: impl FnOnce(&CacheEntry<T>) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut CacheEntry<T>) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.changed.notify_waiters();
        result
    }

    pub fn status(&self) -> EntryStatus {
        self.read(|entry| entry.describe(&self.key, self.kind))
    }

    /// Waits until the entry holds `min_items`, completes, or `max_wait`
    /// elapses. Returns whether the threshold was met (completion counts).
    ///
    /// Wakes on every update; `poll` bounds each sleep so a missed wakeup
    /// costs at most one interval.
    pub async fn wait_for(&self, min_items: usize, max_wait: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (ready, idle) = self.read(|entry| {
                (
                    entry.len() >= min_items || entry.is_complete(),
                    !entry.is_fetching(),
                )
            });
            if ready {
                return true;
            }
            // Nothing will ever change an entry no crawl is writing to.
            if idle {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let nap = (deadline - now).min(poll.max(Duration::from_millis(1)));
            let _ = tokio::time::timeout(nap, notified).await;
        }
    }
}

/// All entries of one entity kind.
pub struct CacheStore<T> {
    kind: EntityKind,
    ttl: Duration,
    entries: RwLock<HashMap<String, Arc<EntryHandle<T>>>>,
}

impl<T: CacheItem> CacheStore<T> {
    pub fn new(kind: EntityKind, ttl: Duration) -> Self {
        Self {
            kind,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns the live entry for `key`, creating it when absent and
    /// replacing it wholesale when stale and idle.
    pub fn get_or_create(&self, key: &str) -> Arc<EntryHandle<T>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            if let Some(handle) = entries.get(key)
                && !handle.read(|entry| entry.is_stale(self.ttl, now))
            {
                return Arc::clone(handle);
            }
        }

        let mut entries = self.entries.write();
        if let Some(handle) = entries.get(key) {
            if !handle.read(|entry| entry.is_stale(self.ttl, now)) {
                return Arc::clone(handle);
            }
            debug!(key, kind = self.kind.as_str(), "replacing stale cache entry");
        }
        let handle = Arc::new(EntryHandle::new(key.to_string(), self.kind));
        entries.insert(key.to_string(), Arc::clone(&handle));
        handle
    }

    pub fn get(&self, key: &str) -> Option<Arc<EntryHandle<T>>> {
        self.entries.read().get(key).cloned()
    }

    /// Drops the entry from the store. A crawl still writing into it keeps
    /// its handle and finishes into the detached entry.
    pub fn evict(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Evicts `key` only while it still maps to `handle`, so a replacement
    /// created in the meantime survives.
    pub fn evict_handle(&self, handle: &Arc<EntryHandle<T>>) -> bool {
        let mut entries = self.entries.write();
        match entries.get(handle.key()) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                entries.remove(handle.key());
                true
            }
            _ => false,
        }
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Type-erased administration over stores of different item types.
pub trait CacheAdmin: Send + Sync {
    fn kind(&self) -> EntityKind;
    fn status(&self, key: &str) -> Option<EntryStatus>;
    fn keys(&self) -> Vec<String>;
    fn statuses(&self) -> Vec<EntryStatus>;
    fn evict(&self, key: &str) -> bool;
    fn clear(&self) -> usize;
}

impl<T: CacheItem> CacheAdmin for CacheStore<T> {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn status(&self, key: &str) -> Option<EntryStatus> {
        self.get(key).map(|handle| handle.status())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn statuses(&self) -> Vec<EntryStatus> {
        let handles: Vec<Arc<EntryHandle<T>>> = {
            let entries = self.entries.read();
            let mut keyed: Vec<_> = entries.iter().collect();
            keyed.sort_by(|a, b| a.0.cmp(b.0));
            keyed.into_iter().map(|(_, handle)| Arc::clone(handle)).collect()
        };
        handles.iter().map(|handle| handle.status()).collect()
    }

    fn evict(&self, key: &str) -> bool {
        CacheStore::evict(self, key)
    }

    fn clear(&self) -> usize {
        CacheStore::clear(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::VideoRecord;

    fn store(ttl: Duration) -> CacheStore<VideoRecord> {
        CacheStore::new(EntityKind::Channel, ttl)
    }

    #[test]
    fn get_or_create_returns_shared_handle() {
        let store = store(Duration::from_secs(60));
        let first = store.get_or_create("channel:UC1");
        let second = store.get_or_create("channel:UC1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn stale_idle_entry_is_replaced() {
        let store = store(Duration::ZERO);
        let first = store.get_or_create("channel:UC1");
        first.update(|entry| entry.merge(vec![VideoRecord::new("a")]));
        let second = store.get_or_create("channel:UC1");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.read(|entry| entry.len()), 0);
    }

    #[test]
    fn stale_entry_survives_while_fetching() {
        let store = store(Duration::ZERO);
        let first = store.get_or_create("channel:UC1");
        assert!(first.update(|entry| entry.try_claim()));
        let second = store.get_or_create("channel:UC1");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn evict_detaches_handle() {
        let store = store(Duration::from_secs(60));
        let handle = store.get_or_create("channel:UC1");
        assert!(store.evict("channel:UC1"));
        assert!(!store.evict("channel:UC1"));
        handle.update(|entry| entry.merge(vec![VideoRecord::new("a")]));
        assert!(store.get("channel:UC1").is_none());
        assert_eq!(handle.read(|entry| entry.len()), 1);
    }

    #[test]
    fn evict_handle_spares_replacements() {
        let store = store(Duration::ZERO);
        let old = store.get_or_create("channel:UC1");
        let replacement = store.get_or_create("channel:UC1");
        assert!(!store.evict_handle(&old));
        assert!(store.evict_handle(&replacement));
        assert!(store.get("channel:UC1").is_none());
    }

    #[test]
    fn admin_lists_sorted_statuses() {
        let store = store(Duration::from_secs(60));
        store.get_or_create("channel:b");
        store.get_or_create("channel:a");
        let admin: &dyn CacheAdmin = &store;
        let keys: Vec<String> = admin.statuses().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["channel:a".to_string(), "channel:b".to_string()]);
        assert_eq!(admin.keys(), keys);
        assert_eq!(admin.clear(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn wait_for_wakes_on_merge() {
        let store = store(Duration::from_secs(60));
        let handle = store.get_or_create("channel:UC1");
        handle.update(|entry| entry.try_claim());
        let writer = Arc::clone(&handle);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.update(|entry| entry.merge(vec![VideoRecord::new("a"), VideoRecord::new("b")]));
        });
        let met = handle
            .wait_for(2, Duration::from_secs(2), Duration::from_millis(500))
            .await;
        assert!(met);
    }

    #[tokio::test]
    async fn wait_for_times_out_below_threshold() {
        let store = store(Duration::from_secs(60));
        let handle = store.get_or_create("channel:UC1");
        handle.update(|entry| entry.try_claim());
        let started = Instant::now();
        let met = handle
            .wait_for(5, Duration::from_millis(50), Duration::from_millis(10))
            .await;
        assert!(!met);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_for_returns_on_completion() {
        let store = store(Duration::from_secs(60));
        let handle = store.get_or_create("channel:UC1");
        handle.update(|entry| {
            entry.try_claim();
            entry.merge(vec![VideoRecord::new("a")]);
            entry.finish(Vec::new());
        });
        assert!(
            handle
                .wait_for(100, Duration::from_secs(5), Duration::from_millis(10))
                .await
        );
    }
}

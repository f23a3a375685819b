#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tokio::time::{Duration, Instant};

use super::EntityKind;
use crate::error::UpstreamError;
use crate::records::CacheItem;
use crate::upstream::Continuation;

/// Freshness reported next to every cached listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Partial,
    Fetching,
    Complete,
}

/// Why a crawl strategy stopped paginating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The upstream returned no further continuation.
    Exhausted,
    /// Consecutive pages admitted nothing new.
    Stalled,
    /// The configured page ceiling was reached.
    PageLimit,
    UpstreamError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyReport {
    pub strategy: String,
    pub pages: usize,
    pub admitted: usize,
    pub stop: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accumulated state of one cache key.
///
/// `items` only grows while the entry lives and never holds two items with
/// the same id; `seen_ids` is the membership index for that rule.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    items: Vec<T>,
    seen_ids: HashSet<String>,
    is_fetching: bool,
    is_complete: bool,
    last_update: Instant,
    last_update_at: DateTime<Utc>,
    continuation: Option<Continuation>,
    error: Option<UpstreamError>,
    strategies: Vec<StrategyReport>,
    context: Value,
}

impl<T: CacheItem> Default for CacheEntry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheItem> CacheEntry<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            seen_ids: HashSet::new(),
            is_fetching: false,
            is_complete: false,
            last_update: Instant::now(),
            last_update_at: Utc::now(),
            continuation: None,
            error: None,
            strategies: Vec::new(),
            context: Value::Null,
        }
    }

    /// Appends the items whose ids were not seen before, in order, and
    /// returns how many were admitted. Items with an empty id are dropped.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = T>) -> usize {
        let mut admitted = 0;
        for item in incoming {
            let id = item.item_id();
            if id.is_empty() || self.seen_ids.contains(id) {
                continue;
            }
            self.seen_ids.insert(id.to_string());
            self.items.push(item);
            admitted += 1;
        }
        self.last_update = Instant::now();
        self.last_update_at = Utc::now();
        admitted
    }

    /// Marks the entry as being crawled. Fails when a crawl already owns it
    /// or the entry has nothing left to fetch.
    pub fn try_claim(&mut self) -> bool {
        if self.is_fetching || self.is_complete {
            return false;
        }
        self.is_fetching = true;
        true
    }

    /// Ends a crawl: the entry becomes complete and stops fetching.
    pub fn finish(&mut self, reports: Vec<StrategyReport>) {
        self.strategies = reports;
        self.is_complete = true;
        self.is_fetching = false;
        self.continuation = None;
    }

    /// Cleanup for a crawl that ended without [`finish`](Self::finish)
    /// running (panic or cancellation).
    pub fn abandon(&mut self) {
        if self.is_fetching {
            self.is_fetching = false;
            if !self.is_complete {
                self.is_complete = true;
                self.error
                    .get_or_insert_with(|| UpstreamError::transport("crawl aborted"));
            }
        }
    }

    pub fn record_error(&mut self, error: UpstreamError) {
        self.error = Some(error);
    }

    pub fn set_continuation(&mut self, continuation: Option<Continuation>) {
        self.continuation = continuation;
    }

    /// First context wins; later strategies do not overwrite it.
    pub fn set_context(&mut self, context: Value) {
        if self.context.is_null() {
            self.context = context;
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    pub fn is_fetching(&self) -> bool {
        self.is_fetching
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn error(&self) -> Option<&UpstreamError> {
        self.error.as_ref()
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    pub fn strategies(&self) -> &[StrategyReport] {
        &self.strategies
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    /// A crawl that failed before gathering anything.
    pub fn failed_empty(&self) -> bool {
        self.is_complete && self.items.is_empty() && self.error.is_some()
    }

    /// Stale entries are replaced wholesale on next access, unless a crawl
    /// is still writing into them.
    pub fn is_stale(&self, ttl: Duration, now: Instant) -> bool {
        !self.is_fetching && now.saturating_duration_since(self.last_update) >= ttl
    }

    pub fn status(&self) -> FetchStatus {
        if self.is_complete {
            FetchStatus::Complete
        } else if self.is_fetching {
            FetchStatus::Fetching
        } else {
            FetchStatus::Partial
        }
    }

    pub fn describe(&self, key: &str, kind: EntityKind) -> EntryStatus {
        EntryStatus {
            key: key.to_string(),
            kind,
            status: self.status(),
            total_cached: self.items.len(),
            is_fetching: self.is_fetching,
            is_complete: self.is_complete,
            last_update: self.last_update_at,
            age_secs: self.last_update.elapsed().as_secs(),
            has_continuation: self.continuation.is_some(),
            error: self.error.as_ref().map(ToString::to_string),
            strategies: self.strategies.clone(),
        }
    }
}

/// Serializable summary of an entry for the cache administration surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStatus {
    pub key: String,
    pub kind: EntityKind,
    pub status: FetchStatus,
    pub total_cached: usize,
    pub is_fetching: bool,
    pub is_complete: bool,
    pub last_update: DateTime<Utc>,
    pub age_secs: u64,
    pub has_continuation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub strategies: Vec<StrategyReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::VideoRecord;

    fn videos(ids: &[&str]) -> Vec<VideoRecord> {
        ids.iter().map(|id| VideoRecord::new(*id)).collect()
    }

    #[test]
    fn merge_admits_only_unseen_ids_in_order() {
        let mut entry = CacheEntry::new();
        assert_eq!(entry.merge(videos(&["a", "b", "a"])), 2);
        assert_eq!(entry.merge(videos(&["b", "c", ""])), 1);
        let ids: Vec<&str> = entry.items().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(entry.contains("c"));
    }

    #[test]
    fn claim_is_exclusive_until_finished() {
        let mut entry: CacheEntry<VideoRecord> = CacheEntry::new();
        assert!(entry.try_claim());
        assert!(!entry.try_claim());
        assert_eq!(entry.status(), FetchStatus::Fetching);
        entry.finish(Vec::new());
        assert!(!entry.is_fetching());
        assert_eq!(entry.status(), FetchStatus::Complete);
        assert!(!entry.try_claim());
    }

    #[test]
    fn abandon_clears_fetching_and_marks_failure() {
        let mut entry: CacheEntry<VideoRecord> = CacheEntry::new();
        entry.try_claim();
        entry.abandon();
        assert!(!entry.is_fetching());
        assert!(entry.is_complete());
        assert!(entry.failed_empty());
    }

    #[test]
    fn abandon_after_finish_keeps_outcome() {
        let mut entry: CacheEntry<VideoRecord> = CacheEntry::new();
        entry.try_claim();
        entry.merge(videos(&["a"]));
        entry.finish(Vec::new());
        entry.abandon();
        assert!(entry.error().is_none());
    }

    #[test]
    fn fetching_entries_never_go_stale() {
        let mut entry: CacheEntry<VideoRecord> = CacheEntry::new();
        let later = Instant::now() + Duration::from_secs(60);
        assert!(entry.is_stale(Duration::from_secs(1), later));
        entry.try_claim();
        assert!(!entry.is_stale(Duration::from_secs(1), later));
    }

    #[test]
    fn first_context_wins() {
        let mut entry: CacheEntry<VideoRecord> = CacheEntry::new();
        entry.set_context(serde_json::json!({"name": "first"}));
        entry.set_context(serde_json::json!({"name": "second"}));
        assert_eq!(entry.context()["name"], "first");
    }

    #[test]
    fn status_summary_serializes_camel_case() {
        let mut entry = CacheEntry::new();
        entry.merge(videos(&["a"]));
        let status = entry.describe("channel:UC1:all:newest", EntityKind::Channel);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["totalCached"], 1);
        assert_eq!(json["status"], "partial");
        assert_eq!(json["kind"], "channel");
        assert!(json.get("error").is_none());
    }
}

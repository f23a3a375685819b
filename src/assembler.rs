#![forbid(unsafe_code)]

//! Turns a cache entry into the paged response envelope.

use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheEntry, FetchStatus};
use crate::records::CacheItem;

/// Inclusive, 1-based item range requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: usize,
    pub end: usize,
}

impl RangeRequest {
    /// Builds a range from optional query parameters. A missing `start`
    /// means 1; a missing `end` extends the window `default_window` items
    /// past `start`.
    pub fn from_params(start: Option<usize>, end: Option<usize>, default_window: usize) -> Self {
        let start = start.unwrap_or(1).max(1);
        let end = end.unwrap_or_else(|| start.saturating_add(default_window.saturating_sub(1)));
        Self { start, end }
    }

    /// Number of cached items needed before this range can be served whole.
    pub fn required_items(&self) -> usize {
        self.end
    }

    fn bounds(&self, len: usize) -> (usize, usize) {
        let lo = self.start.saturating_sub(1).min(len);
        let hi = self.end.min(len);
        (lo, hi.max(lo))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub items: Vec<T>,
    pub total_cached: usize,
    pub total_returned: usize,
    pub status: FetchStatus,
    pub has_more: bool,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

/// Copies the requested window out of `entry`.
///
/// `has_more` is true while the crawl may still add items or items past the
/// window are already cached. Upstream errors are only echoed once the
/// crawl is over.
pub fn slice<T: CacheItem>(entry: &CacheEntry<T>, range: RangeRequest) -> Envelope<T> {
    let total = entry.len();
    let (lo, hi) = range.bounds(total);
    let items = entry.items()[lo..hi].to_vec();
    Envelope {
        total_returned: items.len(),
        items,
        total_cached: total,
        status: entry.status(),
        has_more: !entry.is_complete() || total > range.end,
        start: range.start,
        end: range.end,
        error: entry
            .is_complete()
            .then(|| entry.error().map(ToString::to_string))
            .flatten(),
        context: entry.context().clone(),
    }
}

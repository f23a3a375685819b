#![forbid(unsafe_code)]

//! Boundary to the video platform.
//!
//! The core only sees [`Upstream`]: every call returns either an untyped
//! payload or a [`Page`] of untyped items plus an opaque [`Continuation`].
//! [`innertube`] is the production implementation.

pub mod filters;
pub mod innertube;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::UpstreamError;

pub use filters::{
    ChannelContent, ChannelSort, ChannelTab, CommentSort, DurationFilter, SearchFilters,
    SearchSort, SearchType, UploadDateFilter,
};

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Which upstream endpoint a continuation token must be replayed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Browse,
    Search,
    Next,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Browse => "browse",
            Self::Search => "search",
            Self::Next => "next",
        }
    }
}

/// Kind of items the page behind a continuation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFamily {
    Listing,
    Comments,
}

/// Opaque handle for the next page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Continuation {
    pub token: String,
    pub endpoint: Endpoint,
    pub family: ItemFamily,
}

impl Continuation {
    pub fn new(token: impl Into<String>, endpoint: Endpoint, family: ItemFamily) -> Self {
        Self {
            token: token.into(),
            endpoint,
            family,
        }
    }
}

/// One page of a paginated listing.
///
/// `items` are single-key objects naming their renderer
/// (`{"videoRenderer": {...}}`); `header` carries entity metadata that only
/// the first page of a listing provides.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub continuation: Option<Continuation>,
    pub header: Value,
}

impl Page {
    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolves a channel URL (handle, vanity or legacy user URL) to the
    /// upstream's navigation payload.
    async fn resolve_url(&self, url: &str) -> UpstreamResult<Value>;

    async fn search(&self, query: &str, filters: &SearchFilters) -> UpstreamResult<Page>;

    async fn channel_tab(
        &self,
        channel_id: &str,
        tab: ChannelTab,
        sort: ChannelSort,
    ) -> UpstreamResult<Page>;

    async fn playlist(&self, playlist_id: &str) -> UpstreamResult<Page>;

    /// Full watch-page payload shaped as `{"player": ..., "next": ...}`.
    async fn video(&self, video_id: &str) -> UpstreamResult<Value>;

    /// Opens the comment section of a video, already sorted.
    async fn comments(&self, video_id: &str, sort: CommentSort) -> UpstreamResult<Page>;

    async fn related(&self, video_id: &str) -> UpstreamResult<Page>;

    async fn continuation(&self, continuation: &Continuation) -> UpstreamResult<Page>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_has_more_follows_continuation() {
        let mut page = Page::default();
        assert!(!page.has_more());
        page.continuation = Some(Continuation::new("t", Endpoint::Browse, ItemFamily::Listing));
        assert!(page.has_more());
    }
}

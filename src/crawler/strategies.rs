#![forbid(unsafe_code)]

use async_trait::async_trait;
use serde_json::Value;

use super::Strategy;
use crate::extract::{
    channel_header, comment_from_item, playlist_header, search_result_from_item, video_from_item,
};
use crate::records::{CacheItem, CommentRecord, SearchResultRecord, VideoRecord};
use crate::upstream::{
    ChannelSort, ChannelTab, CommentSort, Page, SearchFilters, Upstream, UpstreamResult,
};

/// Upstream call that opens a listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Seed {
    Search {
        query: String,
        filters: SearchFilters,
    },
    ChannelTab {
        channel_id: String,
        tab: ChannelTab,
        sort: ChannelSort,
    },
    Playlist {
        playlist_id: String,
    },
    Comments {
        video_id: String,
        sort: CommentSort,
    },
    Related {
        video_id: String,
    },
}

impl Seed {
    async fn open(&self, upstream: &dyn Upstream) -> UpstreamResult<Page> {
        match self {
            Self::Search { query, filters } => upstream.search(query, filters).await,
            Self::ChannelTab {
                channel_id,
                tab,
                sort,
            } => upstream.channel_tab(channel_id, *tab, *sort).await,
            Self::Playlist { playlist_id } => upstream.playlist(playlist_id).await,
            Self::Comments { video_id, sort } => upstream.comments(video_id, *sort).await,
            Self::Related { video_id } => upstream.related(video_id).await,
        }
    }
}

type Extractor<T> = fn(&Value) -> Option<T>;
type ContextReader = fn(&Value) -> Value;

/// A listing opened by a [`Seed`] and paged through the upstream's
/// continuation tokens, with a per-item extractor.
pub struct PagedStrategy<T> {
    name: String,
    seed: Seed,
    extract: Extractor<T>,
    context: Option<ContextReader>,
}

impl<T: CacheItem> PagedStrategy<T> {
    pub fn new(name: impl Into<String>, seed: Seed, extract: Extractor<T>) -> Self {
        Self {
            name: name.into(),
            seed,
            extract,
            context: None,
        }
    }

    pub fn with_context(mut self, reader: ContextReader) -> Self {
        self.context = Some(reader);
        self
    }

    pub fn seed_request(&self) -> &Seed {
        &self.seed
    }
}

fn short_from_item(item: &Value) -> Option<VideoRecord> {
    let mut video = video_from_item(item)?;
    video.is_short = true;
    Some(video)
}

fn live_from_item(item: &Value) -> Option<VideoRecord> {
    let mut video = video_from_item(item)?;
    video.is_live = true;
    Some(video)
}

impl PagedStrategy<VideoRecord> {
    pub fn channel_tab(channel_id: &str, tab: ChannelTab, sort: ChannelSort) -> Self {
        let extract: Extractor<VideoRecord> = match tab {
            ChannelTab::Videos => video_from_item,
            ChannelTab::Shorts => short_from_item,
            ChannelTab::Live => live_from_item,
        };
        Self::new(
            format!("{}-tab", tab.as_str()),
            Seed::ChannelTab {
                channel_id: channel_id.to_string(),
                tab,
                sort,
            },
            extract,
        )
        .with_context(channel_header)
    }

    /// Every channel mirrors its uploads into a playlist whose id swaps the
    /// `UC` prefix for `UU`. It pages independently of the tabs and often
    /// reaches further back.
    pub fn uploads(channel_id: &str) -> Option<Self> {
        let suffix = channel_id.strip_prefix("UC")?;
        Some(Self::new(
            "uploads-playlist",
            Seed::Playlist {
                playlist_id: format!("UU{suffix}"),
            },
            video_from_item,
        ))
    }

    pub fn playlist(playlist_id: &str) -> Self {
        Self::new(
            "playlist",
            Seed::Playlist {
                playlist_id: playlist_id.to_string(),
            },
            video_from_item,
        )
        .with_context(playlist_header)
    }

    pub fn related(video_id: &str) -> Self {
        Self::new(
            "related",
            Seed::Related {
                video_id: video_id.to_string(),
            },
            video_from_item,
        )
    }
}

impl PagedStrategy<SearchResultRecord> {
    pub fn search(query: &str, filters: SearchFilters) -> Self {
        Self::new(
            "search",
            Seed::Search {
                query: query.to_string(),
                filters,
            },
            search_result_from_item,
        )
    }
}

impl PagedStrategy<CommentRecord> {
    pub fn comments(video_id: &str, sort: CommentSort) -> Self {
        Self::new(
            format!("comments-{}", sort.as_str()),
            Seed::Comments {
                video_id: video_id.to_string(),
                sort,
            },
            comment_from_item,
        )
    }
}

#[async_trait]
impl<T: CacheItem> Strategy<T> for PagedStrategy<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn seed(&self, upstream: &dyn Upstream) -> UpstreamResult<Page> {
        self.seed.open(upstream).await
    }

    fn extract_items(&self, page: &Page) -> Vec<T> {
        page.items.iter().filter_map(self.extract).collect()
    }

    fn capture_context(&self, page: &Page) -> Option<Value> {
        let reader = self.context?;
        (!page.header.is_null()).then(|| reader(&page.header))
    }
}

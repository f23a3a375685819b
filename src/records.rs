#![forbid(unsafe_code)]

//! Flat DTOs produced by the extraction layer and served by the API.
//!
//! Unlike the raw upstream payloads these have a fixed shape: the identifier
//! is always present and every other field falls back to a documented default
//! (`"N/A"`, `0`, `false`, `null`, `[]`) instead of being omitted.

use serde::{Deserialize, Serialize};

/// Placeholder used for textual fields the upstream did not provide.
pub const NOT_AVAILABLE: &str = "N/A";

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

/// Anything that can be stored in a cache entry and deduplicated by id.
pub trait CacheItem: Clone + Send + Sync + 'static {
    fn item_id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorInfo {
    pub id: Option<String>,
    pub name: String,
    pub url: Option<String>,
    pub avatar: Option<String>,
    pub verified: bool,
}

impl Default for AuthorInfo {
    fn default() -> Self {
        Self {
            id: None,
            name: not_available(),
            url: None,
            avatar: None,
            verified: false,
        }
    }
}

/// Video, short or live stream as it appears in a listing.
///
/// The trailing fields are only populated when the caller opted into
/// enrichment; listings alone never carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration_seconds: u64,
    pub duration_text: String,
    pub view_count: u64,
    pub view_count_text: String,
    pub published: String,
    pub author: AuthorInfo,
    pub is_short: bool,
    pub is_live: bool,
    pub description: String,
    pub like_count: Option<u64>,
    pub tags: Vec<String>,
    pub hashtags: Vec<String>,
    pub upload_date: Option<String>,
    pub category: Option<String>,
}

impl VideoRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: not_available(),
            thumbnail: None,
            duration_seconds: 0,
            duration_text: not_available(),
            view_count: 0,
            view_count_text: not_available(),
            published: not_available(),
            author: AuthorInfo::default(),
            is_short: false,
            is_live: false,
            description: String::new(),
            like_count: None,
            tags: Vec::new(),
            hashtags: Vec::new(),
            upload_date: None,
            category: None,
        }
    }

    /// Copies the detail-only fields from a full video fetch, keeping the
    /// listing values whenever the detail lacks them.
    pub fn enrich_with(&mut self, detail: &VideoDetail) {
        let full = &detail.video;
        if self.title == NOT_AVAILABLE {
            self.title = full.title.clone();
        }
        if full.duration_seconds > 0 {
            self.duration_seconds = full.duration_seconds;
            self.duration_text = full.duration_text.clone();
        }
        if full.view_count > self.view_count {
            self.view_count = full.view_count;
            self.view_count_text = full.view_count_text.clone();
        }
        if !full.description.is_empty() {
            self.description = full.description.clone();
        }
        if self.author.id.is_none() {
            self.author = full.author.clone();
        }
        if self.thumbnail.is_none() {
            self.thumbnail = full.thumbnail.clone();
        }
        self.is_live |= full.is_live;
        self.like_count = full.like_count;
        self.tags = full.tags.clone();
        self.hashtags = full.hashtags.clone();
        self.upload_date = full.upload_date.clone();
        self.category = full.category.clone();
    }
}

impl CacheItem for VideoRecord {
    fn item_id(&self) -> &str {
        &self.id
    }
}

/// Full watch-page metadata for a single video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetail {
    #[serde(flatten)]
    pub video: VideoRecord,
    pub keywords: Vec<String>,
    pub is_family_safe: bool,
    pub channel_subscriber_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: String,
    pub text: String,
    pub author: AuthorInfo,
    pub author_is_channel_owner: bool,
    pub like_count: u64,
    pub like_count_text: String,
    pub published: String,
    pub reply_count: u64,
    pub is_pinned: bool,
    pub is_hearted: bool,
    pub is_edited: bool,
}

impl CommentRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: String::new(),
            author: AuthorInfo::default(),
            author_is_channel_owner: false,
            like_count: 0,
            like_count_text: "0".to_string(),
            published: not_available(),
            reply_count: 0,
            is_pinned: false,
            is_hearted: false,
            is_edited: false,
        }
    }
}

impl CacheItem for CommentRecord {
    fn item_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Video,
    Short,
    Channel,
    Playlist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultRecord {
    pub kind: ResultKind,
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub author: AuthorInfo,
    pub duration_seconds: u64,
    pub view_count: u64,
    pub published: String,
    pub subscriber_count_text: String,
    pub video_count: u64,
    pub description: String,
}

impl SearchResultRecord {
    pub fn new(kind: ResultKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            title: not_available(),
            thumbnail: None,
            author: AuthorInfo::default(),
            duration_seconds: 0,
            view_count: 0,
            published: not_available(),
            subscriber_count_text: not_available(),
            video_count: 0,
            description: String::new(),
        }
    }

    /// Channel results carry the channel id as their author id.
    pub fn channel_id(&self) -> Option<&str> {
        if self.kind != ResultKind::Channel {
            return None;
        }
        self.author
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }

    pub fn from_video(video: VideoRecord) -> Self {
        let kind = if video.is_short {
            ResultKind::Short
        } else {
            ResultKind::Video
        };
        Self {
            kind,
            id: video.id,
            title: video.title,
            thumbnail: video.thumbnail,
            author: video.author,
            duration_seconds: video.duration_seconds,
            view_count: video.view_count,
            published: video.published,
            subscriber_count_text: not_available(),
            video_count: 0,
            description: video.description,
        }
    }
}

impl CacheItem for SearchResultRecord {
    fn item_id(&self) -> &str {
        &self.id
    }
}

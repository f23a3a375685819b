#![forbid(unsafe_code)]

//! Request filters and their upstream encodings.
//!
//! Each filter parses from the query-string spelling used by the HTTP API
//! and contributes a stable fragment to cache keys, so two requests share an
//! entry exactly when they would produce the same upstream listing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    #[default]
    All,
    Video,
    Channel,
    Playlist,
}

impl SearchType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" | "any" => Some(Self::All),
            "video" | "videos" => Some(Self::Video),
            "channel" | "channels" => Some(Self::Channel),
            "playlist" | "playlists" => Some(Self::Playlist),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Video => "video",
            Self::Channel => "channel",
            Self::Playlist => "playlist",
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::All => 0,
            Self::Video => 1,
            Self::Channel => 2,
            Self::Playlist => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    #[default]
    Relevance,
    Rating,
    UploadDate,
    ViewCount,
}

impl SearchSort {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "relevance" => Some(Self::Relevance),
            "rating" => Some(Self::Rating),
            "upload_date" | "uploaddate" | "date" | "newest" => Some(Self::UploadDate),
            "view_count" | "viewcount" | "views" | "popular" => Some(Self::ViewCount),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Rating => "rating",
            Self::UploadDate => "upload_date",
            Self::ViewCount => "view_count",
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Relevance => 0,
            Self::Rating => 1,
            Self::UploadDate => 2,
            Self::ViewCount => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationFilter {
    #[default]
    Any,
    Short,
    Medium,
    Long,
}

impl DurationFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "any" | "all" => Some(Self::Any),
            "short" => Some(Self::Short),
            "medium" => Some(Self::Medium),
            "long" => Some(Self::Long),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Any => 0,
            Self::Short => 1,
            Self::Long => 2,
            Self::Medium => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadDateFilter {
    #[default]
    Any,
    Hour,
    Today,
    Week,
    Month,
    Year,
}

impl UploadDateFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "any" | "all" => Some(Self::Any),
            "hour" | "last_hour" => Some(Self::Hour),
            "today" | "day" => Some(Self::Today),
            "week" | "this_week" => Some(Self::Week),
            "month" | "this_month" => Some(Self::Month),
            "year" | "this_year" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Hour => "hour",
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Any => 0,
            Self::Hour => 1,
            Self::Today => 2,
            Self::Week => 3,
            Self::Month => 4,
            Self::Year => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SearchFilters {
    pub kind: SearchType,
    pub sort: SearchSort,
    pub duration: DurationFilter,
    pub upload_date: UploadDateFilter,
}

impl SearchFilters {
    pub fn channels_only() -> Self {
        Self {
            kind: SearchType::Channel,
            ..Self::default()
        }
    }

    /// Stable cache-key fragment.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.kind.as_str(),
            self.sort.as_str(),
            self.duration.as_str(),
            self.upload_date.as_str()
        )
    }

    /// Encodes the filters as the base64 protobuf `params` blob the search
    /// endpoint expects. `None` when every filter is at its default.
    pub fn to_params(&self) -> Option<String> {
        if *self == Self::default() {
            return None;
        }
        let mut bytes = Vec::with_capacity(12);
        if self.sort != SearchSort::Relevance {
            bytes.extend_from_slice(&[0x08, self.sort.code()]);
        }
        let mut filter = Vec::with_capacity(6);
        if self.upload_date != UploadDateFilter::Any {
            filter.extend_from_slice(&[0x08, self.upload_date.code()]);
        }
        if self.kind != SearchType::All {
            filter.extend_from_slice(&[0x10, self.kind.code()]);
        }
        if self.duration != DurationFilter::Any {
            filter.extend_from_slice(&[0x18, self.duration.code()]);
        }
        if !filter.is_empty() {
            bytes.push(0x12);
            bytes.push(filter.len() as u8);
            bytes.extend_from_slice(&filter);
        }
        Some(STANDARD.encode(bytes))
    }
}

/// Tabs of a channel page that hold uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelTab {
    Videos,
    Shorts,
    Live,
}

impl ChannelTab {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Videos => "videos",
            Self::Shorts => "shorts",
            Self::Live => "live",
        }
    }

    pub fn params(self) -> &'static str {
        match self {
            Self::Videos => "EgZ2aWRlb3PyBgQKAjoA",
            Self::Shorts => "EgZzaG9ydHPyBgUKA5oBAA==",
            Self::Live => "EgdzdHJlYW1z8gYECgJ6AA==",
        }
    }
}

/// Which uploads a channel listing should contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelContent {
    #[default]
    All,
    Videos,
    Shorts,
    Live,
}

impl ChannelContent {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Some(Self::All),
            "video" | "videos" => Some(Self::Videos),
            "short" | "shorts" => Some(Self::Shorts),
            "live" | "streams" => Some(Self::Live),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Videos => "videos",
            Self::Shorts => "shorts",
            Self::Live => "live",
        }
    }

    pub fn tabs(self) -> &'static [ChannelTab] {
        match self {
            Self::All => &[ChannelTab::Videos, ChannelTab::Shorts, ChannelTab::Live],
            Self::Videos => &[ChannelTab::Videos],
            Self::Shorts => &[ChannelTab::Shorts],
            Self::Live => &[ChannelTab::Live],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSort {
    #[default]
    Newest,
    Popular,
    Oldest,
}

impl ChannelSort {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "newest" | "latest" => Some(Self::Newest),
            "popular" => Some(Self::Popular),
            "oldest" => Some(Self::Oldest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Popular => "popular",
            Self::Oldest => "oldest",
        }
    }

    /// Label of the sort chip on a channel tab.
    pub fn chip_label(self) -> &'static str {
        match self {
            Self::Newest => "Latest",
            Self::Popular => "Popular",
            Self::Oldest => "Oldest",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentSort {
    #[default]
    Top,
    Newest,
}

impl CommentSort {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "top" | "popular" => Some(Self::Top),
            "newest" | "new" | "latest" => Some(Self::Newest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Newest => "newest",
        }
    }

    /// Position of this ordering in the upstream sort menu.
    pub fn menu_index(self) -> usize {
        match self {
            Self::Top => 0,
            Self::Newest => 1,
        }
    }
}

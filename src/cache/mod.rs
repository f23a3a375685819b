#![forbid(unsafe_code)]

//! In-memory result cache.
//!
//! One [`CacheStore`] per entity kind maps a cache key to a shared
//! [`EntryHandle`]. The handle pairs the mutable [`CacheEntry`] with a change
//! notifier so readers can wait for a crawl to reach a threshold.

mod entry;
mod store;

use serde::Serialize;

pub use entry::{CacheEntry, EntryStatus, FetchStatus, StopReason, StrategyReport};
pub use store::{CacheAdmin, CacheStore, EntryHandle};

/// Entity families with their own store and crawl limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Channel,
    Search,
    Comments,
    Playlist,
    Related,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        Self::Channel,
        Self::Search,
        Self::Comments,
        Self::Playlist,
        Self::Related,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Search => "search",
            Self::Comments => "comments",
            Self::Playlist => "playlist",
            Self::Related => "related",
        }
    }

    /// Kind a cache key belongs to, taken from its prefix.
    pub fn of_key(key: &str) -> Option<Self> {
        let prefix = key.split(':').next()?;
        Self::ALL.into_iter().find(|kind| kind.as_str() == prefix)
    }

    /// Builds `kind:part:part...` with every part trimmed.
    pub fn key(self, parts: &[&str]) -> String {
        let mut key = self.as_str().to_string();
        for part in parts {
            key.push(':');
            key.push_str(part.trim());
        }
        key
    }
}

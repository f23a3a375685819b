#![forbid(unsafe_code)]

//! Extraction layer: pure functions from untyped upstream payloads to the
//! flat records in [`crate::records`].
//!
//! Nothing here performs I/O or fails. Missing fields fall through ordered
//! path tables ([`paths`]) and finally to the record defaults; the bounded
//! [`visitor`] is the last resort for nodes with no stable position.

pub mod comments;
pub mod detail;
pub mod listing;
pub mod parse;
pub mod paths;
pub mod visitor;

pub use comments::{COMMENT_RENDERERS, comment_from_item};
pub use detail::video_detail_from_payload;
pub use listing::{
    SEARCH_ONLY_RENDERERS, VIDEO_RENDERERS, channel_header, playlist_header, resolved_browse_id,
    search_result_from_item, video_from_item,
};
pub use parse::{extract_hashtags, format_duration, parse_count, parse_duration};

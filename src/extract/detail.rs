#![forbid(unsafe_code)]

//! Watch-page payload (`{player, next}`) to [`VideoDetail`].

use serde_json::Value;

use super::parse::{extract_hashtags, format_duration, parse_count};
use super::paths::{
    any_present, as_text, first_bool, first_count, first_strings, first_text, first_thumbnail,
    lookup,
};
use super::visitor::{DEFAULT_MAX_DEPTH, find_key, find_map};
use crate::records::{VideoDetail, VideoRecord};

const ID: &[&str] = &["player.videoDetails.videoId", "videoId"];
const TITLE: &[&str] = &[
    "player.videoDetails.title",
    "player.microformat.playerMicroformatRenderer.title",
];
const DURATION: &[&str] = &[
    "player.videoDetails.lengthSeconds",
    "player.microformat.playerMicroformatRenderer.lengthSeconds",
];
const VIEWS: &[&str] = &[
    "player.videoDetails.viewCount",
    "player.microformat.playerMicroformatRenderer.viewCount",
];
const AUTHOR: &[&str] = &[
    "player.videoDetails.author",
    "player.microformat.playerMicroformatRenderer.ownerChannelName",
];
const CHANNEL_ID: &[&str] = &[
    "player.videoDetails.channelId",
    "player.microformat.playerMicroformatRenderer.externalChannelId",
];
const CHANNEL_URL: &[&str] = &["player.microformat.playerMicroformatRenderer.ownerProfileUrl"];
const DESCRIPTION: &[&str] = &[
    "player.videoDetails.shortDescription",
    "player.microformat.playerMicroformatRenderer.description",
];
const THUMBNAIL: &[&str] = &[
    "player.videoDetails.thumbnail.thumbnails",
    "player.microformat.playerMicroformatRenderer.thumbnail.thumbnails",
];
const KEYWORDS: &[&str] = &["player.videoDetails.keywords"];
const LIVE: &[&str] = &["player.videoDetails.isLive", "player.videoDetails.isLiveContent"];
const UPLOAD_DATE: &[&str] = &[
    "player.microformat.playerMicroformatRenderer.uploadDate",
    "player.microformat.playerMicroformatRenderer.publishDate",
];
const CATEGORY: &[&str] = &["player.microformat.playerMicroformatRenderer.category"];
const FAMILY_SAFE: &[&str] = &["player.microformat.playerMicroformatRenderer.isFamilySafe"];

/// Like counts only exist as display text on the like button, whose nesting
/// changes often, so it is located by search.
fn like_count(next: &Value) -> Option<u64> {
    let button = find_key(next, "likeButtonViewModel", DEFAULT_MAX_DEPTH)?;
    find_map(button, DEFAULT_MAX_DEPTH, |map| {
        let text = map
            .get("title")
            .and_then(as_text)
            .or_else(|| map.get("accessibilityText").and_then(as_text))?;
        parse_count(&text)
    })
}

fn primary_info(next: &Value) -> Option<&Value> {
    find_key(next, "videoPrimaryInfoRenderer", DEFAULT_MAX_DEPTH)
}

fn owner_info(next: &Value) -> Option<&Value> {
    find_key(next, "videoOwnerRenderer", DEFAULT_MAX_DEPTH)
}

/// Builds a fully populated detail record, or `None` when the payload does
/// not identify a video.
pub fn video_detail_from_payload(payload: &Value) -> Option<VideoDetail> {
    let id = first_text(payload, ID)?;
    let next = payload.get("next").unwrap_or(&Value::Null);
    let primary = primary_info(next);
    let owner = owner_info(next);

    let mut video = VideoRecord::new(id);
    if let Some(title) = first_text(payload, TITLE)
        .or_else(|| primary.and_then(|info| first_text(info, &["title"])))
    {
        video.title = title;
    }
    video.thumbnail = first_thumbnail(payload, THUMBNAIL);
    if let Some(seconds) = first_count(payload, DURATION) {
        video.duration_seconds = seconds;
        video.duration_text = format_duration(seconds);
    }
    let views = first_count(payload, VIEWS).or_else(|| {
        primary.and_then(|info| {
            first_count(info, &["viewCount.videoViewCountRenderer.viewCount"])
        })
    });
    if let Some(views) = views {
        video.view_count = views;
        video.view_count_text = format!("{views} views");
    }
    if let Some(published) = primary.and_then(|info| first_text(info, &["dateText", "relativeDateText"])) {
        video.published = published;
    }
    if let Some(name) = first_text(payload, AUTHOR) {
        video.author.name = name;
    }
    video.author.id = first_text(payload, CHANNEL_ID);
    video.author.url = first_text(payload, CHANNEL_URL)
        .or_else(|| {
            video
                .author
                .id
                .as_ref()
                .map(|id| format!("https://www.youtube.com/channel/{id}"))
        });
    video.author.avatar =
        owner.and_then(|info| first_thumbnail(info, &["thumbnail.thumbnails"]));
    video.author.verified = owner.is_some_and(|info| any_present(info, &["badges.0"]));
    if let Some(description) = first_text(payload, DESCRIPTION) {
        video.description = description;
    }
    video.is_live = first_bool(payload, LIVE).unwrap_or(false);
    video.like_count = like_count(next);
    video.upload_date = first_text(payload, UPLOAD_DATE);
    video.category = first_text(payload, CATEGORY);

    let keywords = first_strings(payload, KEYWORDS);
    let mut hashtags = extract_hashtags(&video.description);
    if let Some(super_title) = primary.and_then(|info| first_text(info, &["superTitleLink"])) {
        for tag in extract_hashtags(&super_title) {
            if !hashtags.contains(&tag) {
                hashtags.push(tag);
            }
        }
    }
    video.tags = keywords.clone();
    video.hashtags = hashtags;
    video.is_short = lookup(payload, "player.microformat.playerMicroformatRenderer.isShortsEligible")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let channel_subscriber_text = owner
        .and_then(|info| first_text(info, &["subscriberCountText"]))
        .unwrap_or_else(|| crate::records::NOT_AVAILABLE.to_string());

    Some(VideoDetail {
        video,
        keywords,
        is_family_safe: first_bool(payload, FAMILY_SAFE).unwrap_or(true),
        channel_subscriber_text,
    })
}

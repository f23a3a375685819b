#![forbid(unsafe_code)]

//! Listing items (videos, shorts, channels, playlists) to flat records.
//!
//! Each upstream renderer gets one row in a declarative table: the renderer
//! key plus an ordered list of candidate paths per field. Adding support for
//! a new renderer revision means adding paths, not code.

use serde_json::Value;

use super::parse::{format_duration, parse_duration};
use super::paths::{
    any_present, first_count, first_text, first_thumbnail, lookup, normalize_url,
};
use super::visitor::{DEFAULT_MAX_DEPTH, find_map};
use crate::records::{AuthorInfo, ResultKind, SearchResultRecord, VideoRecord};

/// Renderer keys that carry a playable item.
pub const VIDEO_RENDERERS: &[&str] = &[
    "videoRenderer",
    "gridVideoRenderer",
    "compactVideoRenderer",
    "playlistVideoRenderer",
    "playlistPanelVideoRenderer",
    "reelItemRenderer",
    "shortsLockupViewModel",
    "lockupViewModel",
];

/// Renderer keys that only appear in search results.
pub const SEARCH_ONLY_RENDERERS: &[&str] = &["channelRenderer", "playlistRenderer"];

struct VideoShape {
    renderer: &'static str,
    is_short: bool,
    id: &'static [&'static str],
    title: &'static [&'static str],
    thumbnail: &'static [&'static str],
    duration: &'static [&'static str],
    views: &'static [&'static str],
    published: &'static [&'static str],
    author_name: &'static [&'static str],
    author_id: &'static [&'static str],
    author_url: &'static [&'static str],
    avatar: &'static [&'static str],
    description: &'static [&'static str],
}

const BYLINE_NAME: &[&str] = &[
    "ownerText",
    "longBylineText",
    "shortBylineText",
    "ownerText.runs.0.text",
];
const BYLINE_ID: &[&str] = &[
    "ownerText.runs.0.navigationEndpoint.browseEndpoint.browseId",
    "longBylineText.runs.0.navigationEndpoint.browseEndpoint.browseId",
    "shortBylineText.runs.0.navigationEndpoint.browseEndpoint.browseId",
    "channelId",
];
const BYLINE_URL: &[&str] = &[
    "ownerText.runs.0.navigationEndpoint.browseEndpoint.canonicalBaseUrl",
    "longBylineText.runs.0.navigationEndpoint.browseEndpoint.canonicalBaseUrl",
    "shortBylineText.runs.0.navigationEndpoint.browseEndpoint.canonicalBaseUrl",
];
const AVATAR: &[&str] = &[
    "channelThumbnailSupportedRenderers.channelThumbnailWithLinkRenderer.thumbnail.thumbnails",
    "channelThumbnail.thumbnails",
    "avatar.decoratedAvatarViewModel.avatar.avatarViewModel.image.sources",
];
const NONE: &[&str] = &[];

const VIDEO_SHAPES: &[VideoShape] = &[
    VideoShape {
        renderer: "videoRenderer",
        is_short: false,
        id: &["videoId"],
        title: &["title", "headline"],
        thumbnail: &["thumbnail.thumbnails"],
        duration: &[
            "lengthText",
            "thumbnailOverlays.0.thumbnailOverlayTimeStatusRenderer.text",
            "lengthSeconds",
        ],
        views: &["viewCountText", "shortViewCountText"],
        published: &["publishedTimeText"],
        author_name: BYLINE_NAME,
        author_id: BYLINE_ID,
        author_url: BYLINE_URL,
        avatar: AVATAR,
        description: &[
            "detailedMetadataSnippets.0.snippetText",
            "descriptionSnippet",
        ],
    },
    VideoShape {
        renderer: "gridVideoRenderer",
        is_short: false,
        id: &["videoId"],
        title: &["title"],
        thumbnail: &["thumbnail.thumbnails"],
        duration: &[
            "thumbnailOverlays.0.thumbnailOverlayTimeStatusRenderer.text",
            "lengthText",
        ],
        views: &["viewCountText", "shortViewCountText"],
        published: &["publishedTimeText"],
        author_name: BYLINE_NAME,
        author_id: BYLINE_ID,
        author_url: BYLINE_URL,
        avatar: AVATAR,
        description: NONE,
    },
    VideoShape {
        renderer: "compactVideoRenderer",
        is_short: false,
        id: &["videoId"],
        title: &["title"],
        thumbnail: &["thumbnail.thumbnails"],
        duration: &[
            "lengthText",
            "thumbnailOverlays.0.thumbnailOverlayTimeStatusRenderer.text",
        ],
        views: &["viewCountText", "shortViewCountText"],
        published: &["publishedTimeText"],
        author_name: BYLINE_NAME,
        author_id: BYLINE_ID,
        author_url: BYLINE_URL,
        avatar: AVATAR,
        description: NONE,
    },
    VideoShape {
        renderer: "playlistVideoRenderer",
        is_short: false,
        id: &["videoId"],
        title: &["title"],
        thumbnail: &["thumbnail.thumbnails"],
        duration: &["lengthSeconds", "lengthText"],
        views: &["videoInfo.runs.0.text", "videoInfo"],
        published: &["videoInfo.runs.2.text"],
        author_name: BYLINE_NAME,
        author_id: BYLINE_ID,
        author_url: BYLINE_URL,
        avatar: NONE,
        description: NONE,
    },
    VideoShape {
        renderer: "playlistPanelVideoRenderer",
        is_short: false,
        id: &["videoId"],
        title: &["title"],
        thumbnail: &["thumbnail.thumbnails"],
        duration: &["lengthText"],
        views: NONE,
        published: NONE,
        author_name: BYLINE_NAME,
        author_id: BYLINE_ID,
        author_url: BYLINE_URL,
        avatar: NONE,
        description: NONE,
    },
    VideoShape {
        renderer: "reelItemRenderer",
        is_short: true,
        id: &["videoId"],
        title: &["headline", "accessibility.accessibilityData.label"],
        thumbnail: &["thumbnail.thumbnails"],
        duration: NONE,
        views: &["viewCountText"],
        published: &["publishedTimeText"],
        author_name: BYLINE_NAME,
        author_id: BYLINE_ID,
        author_url: BYLINE_URL,
        avatar: NONE,
        description: NONE,
    },
    VideoShape {
        renderer: "shortsLockupViewModel",
        is_short: true,
        id: &[
            "onTap.innertubeCommand.reelWatchEndpoint.videoId",
            "inlinePlayerData.onVisible.innertubeCommand.watchEndpoint.videoId",
        ],
        title: &["overlayMetadata.primaryText", "accessibilityText"],
        thumbnail: &["thumbnail.sources", "thumbnailViewModel.thumbnailViewModel.image.sources"],
        duration: NONE,
        views: &["overlayMetadata.secondaryText"],
        published: NONE,
        author_name: NONE,
        author_id: NONE,
        author_url: NONE,
        avatar: NONE,
        description: NONE,
    },
    VideoShape {
        renderer: "lockupViewModel",
        is_short: false,
        id: &["contentId"],
        title: &["metadata.lockupMetadataViewModel.title"],
        thumbnail: &["contentImage.thumbnailViewModel.image.sources"],
        duration: &[
            "contentImage.thumbnailViewModel.overlays.0.thumbnailOverlayBadgeViewModel.thumbnailBadges.0.thumbnailBadgeViewModel.text",
            "contentImage.thumbnailViewModel.overlays.0.thumbnailBottomOverlayViewModel.badges.0.thumbnailBadgeViewModel.text",
        ],
        views: &[
            "metadata.lockupMetadataViewModel.metadata.contentMetadataViewModel.metadataRows.1.metadataParts.0.text",
        ],
        published: &[
            "metadata.lockupMetadataViewModel.metadata.contentMetadataViewModel.metadataRows.1.metadataParts.1.text",
        ],
        author_name: &[
            "metadata.lockupMetadataViewModel.metadata.contentMetadataViewModel.metadataRows.0.metadataParts.0.text",
        ],
        author_id: &[
            "metadata.lockupMetadataViewModel.image.decoratedAvatarViewModel.rendererContext.commandContext.onTap.innertubeCommand.browseEndpoint.browseId",
        ],
        author_url: &[
            "metadata.lockupMetadataViewModel.image.decoratedAvatarViewModel.rendererContext.commandContext.onTap.innertubeCommand.browseEndpoint.canonicalBaseUrl",
        ],
        avatar: &[
            "metadata.lockupMetadataViewModel.image.decoratedAvatarViewModel.avatar.avatarViewModel.image.sources",
        ],
        description: NONE,
    },
];

/// Splits a single-key item (`{"videoRenderer": {...}}`) into name and body.
pub fn renderer_of(item: &Value) -> Option<(&str, &Value)> {
    let map = item.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.iter().next().map(|(key, value)| (key.as_str(), value))
}

fn author_from(
    body: &Value,
    name: &[&str],
    id: &[&str],
    url: &[&str],
    avatar: &[&str],
) -> AuthorInfo {
    let mut author = AuthorInfo::default();
    if let Some(value) = first_text(body, name) {
        author.name = value;
    }
    author.id = first_text(body, id).filter(|value| value.starts_with("UC"));
    author.url = first_text(body, url)
        .and_then(|value| normalize_url(&value))
        .or_else(|| {
            author
                .id
                .as_ref()
                .map(|id| format!("https://www.youtube.com/channel/{id}"))
        });
    author.avatar = first_thumbnail(body, avatar);
    author.verified = has_badge(body, "VERIFIED");
    author
}

/// Badge styles live under `badges`/`ownerBadges` as
/// `metadataBadgeRenderer.style`; the nesting shifts, so search for it.
fn has_badge(body: &Value, needle: &str) -> bool {
    ["ownerBadges", "badges"].iter().any(|key| {
        body.get(*key).is_some_and(|badges| {
            find_map(badges, 6, |map| {
                map.get("style")
                    .and_then(Value::as_str)
                    .filter(|style| style.contains(needle))
            })
            .is_some()
        })
    })
}

fn is_live(body: &Value) -> bool {
    if has_badge(body, "LIVE") {
        return true;
    }
    let overlay = lookup(
        body,
        "thumbnailOverlays.0.thumbnailOverlayTimeStatusRenderer.style",
    )
    .and_then(Value::as_str);
    matches!(overlay, Some("LIVE"))
}

fn lockup_is_video(body: &Value) -> bool {
    match lookup(body, "contentType").and_then(Value::as_str) {
        Some(kind) => kind == "LOCKUP_CONTENT_TYPE_VIDEO",
        None => true,
    }
}

/// Normalizes any known playable renderer into a [`VideoRecord`]. Returns
/// `None` only when no identifier can be found.
pub fn video_from_item(item: &Value) -> Option<VideoRecord> {
    let (name, body) = renderer_of(item)?;
    let shape = VIDEO_SHAPES.iter().find(|shape| shape.renderer == name)?;
    if name == "lockupViewModel" && !lockup_is_video(body) {
        return None;
    }

    let id = first_text(body, shape.id).or_else(|| {
        lookup(body, "entityId")
            .and_then(Value::as_str)
            .and_then(|entity| entity.strip_prefix("shorts-shelf-item-"))
            .map(str::to_string)
    })?;

    let mut record = VideoRecord::new(id);
    record.is_short = shape.is_short;
    if let Some(title) = first_text(body, shape.title) {
        record.title = title;
    }
    record.thumbnail = first_thumbnail(body, shape.thumbnail).or_else(|| {
        Some(format!(
            "https://i.ytimg.com/vi/{}/hqdefault.jpg",
            record.id
        ))
    });
    if let Some(text) = first_text(body, shape.duration) {
        if let Some(seconds) = parse_duration(&text) {
            record.duration_seconds = seconds;
            record.duration_text = format_duration(seconds);
        } else {
            record.duration_text = text;
        }
    }
    if let Some(text) = first_text(body, shape.views) {
        record.view_count = first_count(body, shape.views).unwrap_or(0);
        record.view_count_text = text;
    }
    if let Some(published) = first_text(body, shape.published) {
        record.published = published;
    }
    record.author = author_from(
        body,
        shape.author_name,
        shape.author_id,
        shape.author_url,
        shape.avatar,
    );
    if let Some(description) = first_text(body, shape.description) {
        record.description = description;
    }
    record.is_live = is_live(body);
    Some(record)
}

fn channel_result(body: &Value) -> Option<SearchResultRecord> {
    let id = first_text(body, &["channelId"])?;
    let mut record = SearchResultRecord::new(ResultKind::Channel, id.clone());
    if let Some(title) = first_text(body, &["title", "shortBylineText"]) {
        record.title = title.clone();
        record.author.name = title;
    }
    record.thumbnail = first_thumbnail(body, &["thumbnail.thumbnails"]);
    record.author.id = Some(id.clone());
    record.author.avatar = record.thumbnail.clone();
    record.author.url = first_text(
        body,
        &["navigationEndpoint.browseEndpoint.canonicalBaseUrl"],
    )
    .and_then(|url| normalize_url(&url))
    .or_else(|| Some(format!("https://www.youtube.com/channel/{id}")));
    record.author.verified = has_badge(body, "VERIFIED");
    // Newer layouts put the @handle into subscriberCountText and move the
    // subscriber figure into videoCountText.
    let subscribers = first_text(body, &["subscriberCountText", "videoCountText"])
        .filter(|text| !text.starts_with('@'))
        .or_else(|| first_text(body, &["videoCountText"]));
    if let Some(text) = subscribers {
        record.subscriber_count_text = text;
    }
    if let Some(description) = first_text(body, &["descriptionSnippet"]) {
        record.description = description;
    }
    Some(record)
}

fn playlist_result(body: &Value) -> Option<SearchResultRecord> {
    let id = first_text(body, &["playlistId"])?;
    let mut record = SearchResultRecord::new(ResultKind::Playlist, id);
    if let Some(title) = first_text(body, &["title"]) {
        record.title = title;
    }
    record.thumbnail = first_thumbnail(
        body,
        &[
            "thumbnails.0.thumbnails",
            "thumbnailRenderer.playlistVideoThumbnailRenderer.thumbnail.thumbnails",
        ],
    );
    record.video_count = first_count(body, &["videoCount", "videoCountText", "videoCountShortText"])
        .unwrap_or(0);
    record.author = author_from(body, BYLINE_NAME, BYLINE_ID, BYLINE_URL, NONE);
    Some(record)
}

fn lockup_playlist_result(body: &Value) -> Option<SearchResultRecord> {
    let kind = lookup(body, "contentType").and_then(Value::as_str)?;
    if kind != "LOCKUP_CONTENT_TYPE_PLAYLIST" {
        return None;
    }
    let id = first_text(body, &["contentId"])?;
    let mut record = SearchResultRecord::new(ResultKind::Playlist, id);
    if let Some(title) = first_text(body, &["metadata.lockupMetadataViewModel.title"]) {
        record.title = title;
    }
    record.thumbnail = first_thumbnail(
        body,
        &["contentImage.collectionThumbnailViewModel.primaryThumbnail.thumbnailViewModel.image.sources"],
    );
    record.video_count = first_count(
        body,
        &["contentImage.collectionThumbnailViewModel.primaryThumbnail.thumbnailViewModel.overlays.0.thumbnailOverlayBadgeViewModel.thumbnailBadges.0.thumbnailBadgeViewModel.text"],
    )
    .unwrap_or(0);
    Some(record)
}

/// Normalizes any search result item; videos and shorts go through
/// [`video_from_item`].
pub fn search_result_from_item(item: &Value) -> Option<SearchResultRecord> {
    let (name, body) = renderer_of(item)?;
    match name {
        "channelRenderer" => channel_result(body),
        "playlistRenderer" => playlist_result(body),
        "lockupViewModel" if !lockup_is_video(body) => lockup_playlist_result(body),
        _ => video_from_item(item).map(SearchResultRecord::from_video),
    }
}

/// Browse id returned by the URL-resolution endpoint.
pub fn resolved_browse_id(payload: &Value) -> Option<String> {
    first_text(
        payload,
        &[
            "endpoint.browseEndpoint.browseId",
            "browseEndpoint.browseId",
            "endpoint.commandMetadata.webCommandMetadata.url",
        ],
    )
    .filter(|id| id.starts_with("UC"))
    .or_else(|| {
        find_map(payload, DEFAULT_MAX_DEPTH, |map| {
            map.get("browseId")
                .and_then(Value::as_str)
                .filter(|id| id.starts_with("UC"))
                .map(str::to_string)
        })
    })
}

/// Channel header metadata captured alongside a channel listing.
pub fn channel_header(header: &Value) -> Value {
    let name = first_text(
        header,
        &[
            "c4TabbedHeaderRenderer.title",
            "pageHeaderRenderer.pageTitle",
            "metadata.channelMetadataRenderer.title",
        ],
    );
    let avatar = first_thumbnail(
        header,
        &[
            "c4TabbedHeaderRenderer.avatar.thumbnails",
            "metadata.channelMetadataRenderer.avatar.thumbnails",
            "pageHeaderRenderer.content.pageHeaderViewModel.image.decoratedAvatarViewModel.avatar.avatarViewModel.image.sources",
        ],
    );
    let subscribers = first_text(
        header,
        &[
            "c4TabbedHeaderRenderer.subscriberCountText",
            "pageHeaderRenderer.content.pageHeaderViewModel.metadata.contentMetadataViewModel.metadataRows.1.metadataParts.0.text",
        ],
    );
    let description = first_text(header, &["metadata.channelMetadataRenderer.description"]);
    serde_json::json!({
        "name": name,
        "avatar": avatar,
        "subscriberCountText": subscribers,
        "description": description,
    })
}

/// Playlist header metadata captured alongside a playlist listing.
pub fn playlist_header(header: &Value) -> Value {
    let title = first_text(
        header,
        &[
            "playlistHeaderRenderer.title",
            "pageHeaderRenderer.pageTitle",
            "metadata.playlistMetadataRenderer.title",
        ],
    );
    let owner = first_text(
        header,
        &[
            "playlistHeaderRenderer.ownerText",
            "pageHeaderRenderer.content.pageHeaderViewModel.metadata.contentMetadataViewModel.metadataRows.0.metadataParts.0.text",
        ],
    );
    let video_count = first_count(
        header,
        &[
            "playlistHeaderRenderer.numVideosText",
            "playlistHeaderRenderer.stats.0",
        ],
    );
    let description = first_text(
        header,
        &[
            "playlistHeaderRenderer.descriptionText",
            "metadata.playlistMetadataRenderer.description",
        ],
    );
    serde_json::json!({
        "title": title,
        "owner": owner,
        "videoCount": video_count,
        "description": description,
    })
}

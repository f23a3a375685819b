#![forbid(unsafe_code)]

//! Comment items to [`CommentRecord`].
//!
//! The upstream serves two comment layouts (the classic `commentRenderer`
//! and the entity-store `commentEntityPayload`) and spells the same facts
//! several ways within each, so every field is an ordered probe list.

use serde_json::Value;

use super::listing::renderer_of;
use super::paths::{any_present, first_bool, first_count, first_text, first_thumbnail};
use crate::records::CommentRecord;

pub const COMMENT_RENDERERS: &[&str] = &["commentRenderer", "commentEntityPayload"];

struct CommentShape {
    renderer: &'static str,
    id: &'static [&'static str],
    text: &'static [&'static str],
    author_name: &'static [&'static str],
    author_id: &'static [&'static str],
    avatar: &'static [&'static str],
    owner: &'static [&'static str],
    likes: &'static [&'static str],
    published: &'static [&'static str],
    replies: &'static [&'static str],
    pinned: &'static [&'static str],
    hearted: &'static [&'static str],
    hearted_present: &'static [&'static str],
}

const COMMENT_SHAPES: &[CommentShape] = &[
    CommentShape {
        renderer: "commentRenderer",
        id: &["commentId"],
        text: &["contentText"],
        author_name: &["authorText"],
        author_id: &[
            "authorEndpoint.browseEndpoint.browseId",
            "authorCommentBadge.authorCommentBadgeRenderer.authorEndpoint.browseEndpoint.browseId",
        ],
        avatar: &["authorThumbnail.thumbnails"],
        owner: &["authorIsChannelOwner", "author_is_channel_owner"],
        likes: &["voteCount", "likeCount", "vote_count"],
        published: &["publishedTimeText"],
        replies: &[
            "replyCount",
            "reply_count",
            "replies.commentRepliesRenderer.viewReplies.buttonRenderer.text",
        ],
        pinned: &["pinnedCommentBadge", "pinnedBadge"],
        hearted: &[
            "actionButtons.commentActionButtonsRenderer.creatorHeart.creatorHeartRenderer.isHearted",
            "isHearted",
            "is_hearted",
        ],
        hearted_present: NONE,
    },
    CommentShape {
        renderer: "commentEntityPayload",
        id: &["properties.commentId", "key"],
        text: &["properties.content"],
        author_name: &["author.displayName"],
        author_id: &["author.channelId"],
        avatar: &["author.avatarThumbnailUrl", "avatar.image.sources"],
        owner: &["author.isCreator", "author.isChannelOwner"],
        likes: &[
            "toolbar.likeCountNotliked",
            "toolbar.likeCountA11y",
            "toolbar.likeCountLiked",
        ],
        published: &["properties.publishedTime"],
        replies: &["toolbar.replyCount", "replyCount"],
        pinned: &["properties.pinnedText", "pinnedText"],
        hearted: &["toolbar.isHearted"],
        hearted_present: &["toolbar.heartActiveTooltip", "toolbar.creatorThumbnailUrl"],
    },
];

const NONE: &[&str] = &[];

/// Normalizes one comment item. `None` only when no identifier exists.
pub fn comment_from_item(item: &Value) -> Option<CommentRecord> {
    let (name, body) = renderer_of(item)?;
    let shape = COMMENT_SHAPES.iter().find(|shape| shape.renderer == name)?;
    let id = first_text(body, shape.id)?;

    let mut record = CommentRecord::new(id);
    if let Some(text) = first_text(body, shape.text) {
        record.text = text;
    }
    if let Some(name) = first_text(body, shape.author_name) {
        record.author.name = name;
    }
    record.author.id = first_text(body, shape.author_id);
    record.author.url = record
        .author
        .id
        .as_ref()
        .map(|id| format!("https://www.youtube.com/channel/{id}"));
    record.author.avatar = first_thumbnail(body, shape.avatar);
    record.author_is_channel_owner = first_bool(body, shape.owner).unwrap_or(false);
    record.author.verified = any_present(body, &["authorCommentBadge", "author.isVerified"])
        && first_bool(body, &["author.isVerified"]).unwrap_or(true);
    if let Some(text) = first_text(body, shape.likes) {
        record.like_count = first_count(body, shape.likes).unwrap_or(0);
        record.like_count_text = text;
    }
    if let Some(published) = first_text(body, shape.published) {
        record.is_edited = published.contains("(edited)");
        record.published = published.replace("(edited)", "").trim().to_string();
    }
    record.reply_count = first_count(body, shape.replies).unwrap_or(0);
    record.is_pinned = any_present(body, shape.pinned);
    record.is_hearted = first_bool(body, shape.hearted)
        .unwrap_or_else(|| any_present(body, shape.hearted_present));
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classic_renderer_with_flags() {
        let item = json!({"commentRenderer": {
            "commentId": "c1",
            "contentText": {"runs": [{"text": "great "}, {"text": "video"}]},
            "authorText": {"simpleText": "@fan"},
            "authorEndpoint": {"browseEndpoint": {"browseId": "UCfan"}},
            "voteCount": {"simpleText": "1.2K"},
            "publishedTimeText": {"runs": [{"text": "3 days ago (edited)"}]},
            "replyCount": 4,
            "pinnedCommentBadge": {"pinnedCommentBadgeRenderer": {}},
            "actionButtons": {"commentActionButtonsRenderer": {
                "creatorHeart": {"creatorHeartRenderer": {"isHearted": true}}
            }}
        }});
        let record = comment_from_item(&item).unwrap();
        assert_eq!(record.id, "c1");
        assert_eq!(record.text, "great video");
        assert_eq!(record.author.id.as_deref(), Some("UCfan"));
        assert_eq!(record.like_count, 1_200);
        assert_eq!(record.published, "3 days ago");
        assert!(record.is_edited);
        assert_eq!(record.reply_count, 4);
        assert!(record.is_pinned);
        assert!(record.is_hearted);
    }

    #[test]
    fn reply_count_falls_back_to_button_text() {
        let item = json!({"commentRenderer": {
            "commentId": "c2",
            "replies": {"commentRepliesRenderer": {"viewReplies": {"buttonRenderer": {
                "text": {"runs": [{"text": "12 replies"}]}
            }}}}
        }});
        let record = comment_from_item(&item).unwrap();
        assert_eq!(record.reply_count, 12);
        assert!(!record.is_pinned);
        assert!(!record.is_hearted);
        assert_eq!(record.like_count, 0);
    }

    #[test]
    fn entity_payload_layout() {
        let item = json!({"commentEntityPayload": {
            "properties": {
                "commentId": "c3",
                "content": {"content": "first!"},
                "publishedTime": "1 hour ago"
            },
            "author": {"displayName": "@early", "channelId": "UCearly", "isCreator": true},
            "toolbar": {
                "likeCountNotliked": "15",
                "replyCount": "2",
                "heartActiveTooltip": "❤ by creator"
            }
        }});
        let record = comment_from_item(&item).unwrap();
        assert_eq!(record.id, "c3");
        assert_eq!(record.text, "first!");
        assert!(record.author_is_channel_owner);
        assert_eq!(record.like_count, 15);
        assert_eq!(record.reply_count, 2);
        assert!(record.is_hearted);
        assert!(!record.is_edited);
    }
}

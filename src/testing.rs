//! Scripted upstream for exercising crawls without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::UpstreamError;
use crate::session::SessionFactory;
use crate::upstream::{
    ChannelSort, ChannelTab, CommentSort, Continuation, Endpoint, ItemFamily, Page, SearchFilters,
    Upstream, UpstreamResult,
};

pub enum Scripted {
    Items(Vec<Value>),
    Fail(UpstreamError),
}

/// Serves pre-recorded pages keyed by request:
/// `search:{query}`, `tab:{channel}:{tab}:{sort}`, `playlist:{id}`,
/// `comments:{video}:{sort}`, `related:{video}`. Unscripted listings are
/// empty; continuation tokens are `{key}#{page}`.
#[derive(Default)]
pub struct ScriptedUpstream {
    listings: HashMap<String, Vec<Scripted>>,
    headers: HashMap<String, Value>,
    resolutions: HashMap<String, Value>,
    videos: HashMap<String, Value>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(mut self, key: &str, pages: Vec<Vec<Value>>) -> Self {
        self.listings.insert(
            key.to_string(),
            pages.into_iter().map(Scripted::Items).collect(),
        );
        self
    }

    pub fn script(mut self, key: &str, script: Vec<Scripted>) -> Self {
        self.listings.insert(key.to_string(), script);
        self
    }

    pub fn header(mut self, key: &str, header: Value) -> Self {
        self.headers.insert(key.to_string(), header);
        self
    }

    pub fn resolves(mut self, url: &str, browse_id: &str) -> Self {
        self.resolutions.insert(
            url.to_string(),
            json!({"endpoint": {"browseEndpoint": {"browseId": browse_id}}}),
        );
        self
    }

    pub fn video(mut self, id: &str, title: &str) -> Self {
        self.videos.insert(id.to_string(), video_payload(id, title));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of recorded calls whose label starts with `prefix`.
    pub fn calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    async fn record(&self, label: String) {
        self.calls.lock().push(label);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn serve(&self, key: &str, index: usize, family: ItemFamily) -> UpstreamResult<Page> {
        self.record(format!("{key}#{index}")).await;
        let Some(script) = self.listings.get(key) else {
            return Ok(Page::default());
        };
        match script.get(index) {
            None => Ok(Page::default()),
            Some(Scripted::Fail(err)) => Err(err.clone()),
            Some(Scripted::Items(items)) => Ok(Page {
                items: items.clone(),
                continuation: (index + 1 < script.len()).then(|| {
                    Continuation::new(format!("{key}#{}", index + 1), Endpoint::Browse, family)
                }),
                header: if index == 0 {
                    self.headers.get(key).cloned().unwrap_or(Value::Null)
                } else {
                    Value::Null
                },
            }),
        }
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn resolve_url(&self, url: &str) -> UpstreamResult<Value> {
        self.record(format!("resolve:{url}")).await;
        self.resolutions
            .get(url)
            .cloned()
            .ok_or(UpstreamError::Status { status: 404 })
    }

    async fn search(&self, query: &str, _filters: &SearchFilters) -> UpstreamResult<Page> {
        self.serve(&format!("search:{query}"), 0, ItemFamily::Listing)
            .await
    }

    async fn channel_tab(
        &self,
        channel_id: &str,
        tab: ChannelTab,
        sort: ChannelSort,
    ) -> UpstreamResult<Page> {
        let key = format!("tab:{channel_id}:{}:{}", tab.as_str(), sort.as_str());
        self.serve(&key, 0, ItemFamily::Listing).await
    }

    async fn playlist(&self, playlist_id: &str) -> UpstreamResult<Page> {
        self.serve(&format!("playlist:{playlist_id}"), 0, ItemFamily::Listing)
            .await
    }

    async fn video(&self, video_id: &str) -> UpstreamResult<Value> {
        self.record(format!("video:{video_id}")).await;
        self.videos
            .get(video_id)
            .cloned()
            .ok_or_else(|| UpstreamError::Missing(video_id.to_string()))
    }

    async fn comments(&self, video_id: &str, sort: CommentSort) -> UpstreamResult<Page> {
        let key = format!("comments:{video_id}:{}", sort.as_str());
        self.serve(&key, 0, ItemFamily::Comments).await
    }

    async fn related(&self, video_id: &str) -> UpstreamResult<Page> {
        self.serve(&format!("related:{video_id}"), 0, ItemFamily::Listing)
            .await
    }

    async fn continuation(&self, continuation: &Continuation) -> UpstreamResult<Page> {
        let (key, index) = continuation
            .token
            .rsplit_once('#')
            .and_then(|(key, index)| Some((key, index.parse::<usize>().ok()?)))
            .ok_or_else(|| UpstreamError::shape("bad scripted token"))?;
        self.serve(key, index, continuation.family).await
    }
}

/// Hands out the same scripted upstream and counts how often it was asked.
pub struct CountingFactory {
    upstream: Arc<ScriptedUpstream>,
    created: AtomicUsize,
}

impl CountingFactory {
    pub fn new(upstream: ScriptedUpstream) -> Self {
        Self::shared(Arc::new(upstream))
    }

    pub fn shared(upstream: Arc<ScriptedUpstream>) -> Self {
        Self {
            upstream,
            created: AtomicUsize::new(0),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for CountingFactory {
    async fn create(&self) -> UpstreamResult<Arc<dyn Upstream>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.upstream.clone())
    }
}

pub fn video_item(id: &str) -> Value {
    json!({"videoRenderer": {
        "videoId": id,
        "title": {"runs": [{"text": format!("Video {id}")}]},
        "lengthText": {"simpleText": "3:05"},
        "viewCountText": {"simpleText": "1,024 views"},
        "publishedTimeText": {"simpleText": "2 days ago"},
        "ownerText": {"runs": [{"text": "Uploader", "navigationEndpoint": {
            "browseEndpoint": {"browseId": "UCuploader0000000000000000"}
        }}]}
    }})
}

pub fn short_item(id: &str) -> Value {
    json!({"reelItemRenderer": {
        "videoId": id,
        "headline": {"simpleText": format!("Short {id}")}
    }})
}

pub fn channel_item(id: &str, name: &str) -> Value {
    json!({"channelRenderer": {
        "channelId": id,
        "title": {"simpleText": name}
    }})
}

pub fn comment_item(id: &str) -> Value {
    json!({"commentRenderer": {
        "commentId": id,
        "contentText": {"runs": [{"text": format!("comment {id}")}]},
        "authorText": {"simpleText": "@viewer"}
    }})
}

/// `count` pages of `per_page` distinct video items each.
pub fn numbered_pages(prefix: &str, count: usize, per_page: usize) -> Vec<Vec<Value>> {
    (0..count)
        .map(|page| {
            (0..per_page)
                .map(|slot| video_item(&format!("{prefix}{}", page * per_page + slot)))
                .collect()
        })
        .collect()
}

pub fn video_payload(id: &str, title: &str) -> Value {
    json!({
        "player": {
            "playabilityStatus": {"status": "OK"},
            "videoDetails": {
                "videoId": id,
                "title": title,
                "lengthSeconds": "185",
                "viewCount": "1024",
                "author": "Uploader",
                "channelId": "UCuploader0000000000000000",
                "shortDescription": "watch this #demo",
                "keywords": ["demo"]
            },
            "microformat": {"playerMicroformatRenderer": {
                "uploadDate": "2024-05-01",
                "category": "Education"
            }}
        },
        "next": {}
    })
}

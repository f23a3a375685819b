#![forbid(unsafe_code)]

//! Production [`Upstream`] speaking the web client's InnerTube JSON API.
//!
//! Requests go through a blocking `ureq` agent on the blocking pool. A client
//! carries one session identity (client version plus visitor data) scraped
//! from the platform home page; replacing the session means building a new
//! client, see [`crate::session`].

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    ChannelSort, ChannelTab, CommentSort, Continuation, Endpoint, ItemFamily, Page,
    SearchFilters, Upstream, UpstreamResult,
};
use crate::config::UpstreamSettings;
use crate::error::UpstreamError;
use crate::extract::paths::{as_text, lookup};
use crate::extract::visitor::{DEFAULT_MAX_DEPTH, Step, TreeVisitor, collect_keyed, find_key, find_map};
use crate::extract::{COMMENT_RENDERERS, SEARCH_ONLY_RENDERERS, VIDEO_RENDERERS};

pub const DEFAULT_CLIENT_VERSION: &str = "2.20240726.00.00";
const CLIENT_NAME: &str = "WEB";

/// Nodes whose continuations page something other than the listing itself
/// (reply threads, sort menus, filter chips).
const FOREIGN_CONTINUATIONS: &[&str] = &[
    "commentRepliesRenderer",
    "sortFilterSubMenuRenderer",
    "chipCloudChipRenderer",
    "chipViewModel",
    "feedFilterChipBarRenderer",
];

/// Session identity presented with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_version: String,
    pub visitor_data: Option<String>,
    pub api_key: Option<String>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
            visitor_data: None,
            api_key: None,
        }
    }
}

impl ClientIdentity {
    /// Pulls the identity out of the home page's embedded config, keeping
    /// defaults for anything the page no longer exposes.
    pub fn scrape(html: &str) -> Self {
        let defaults = Self::default();
        Self {
            client_version: scrape_quoted(html, "INNERTUBE_CLIENT_VERSION")
                .unwrap_or(defaults.client_version),
            visitor_data: scrape_quoted(html, "VISITOR_DATA"),
            api_key: scrape_quoted(html, "INNERTUBE_API_KEY"),
        }
    }
}

fn scrape_quoted(html: &str, key: &str) -> Option<String> {
    let marker = format!("\"{key}\":\"");
    let start = html.find(&marker)? + marker.len();
    let end = html[start..].find('"')?;
    let value = &html[start..start + end];
    (!value.is_empty()).then(|| value.to_string())
}

#[derive(Clone)]
pub struct InnertubeClient {
    agent: ureq::Agent,
    base_url: String,
    context: Value,
    identity: ClientIdentity,
}

impl InnertubeClient {
    pub fn new(settings: &UpstreamSettings, identity: ClientIdentity) -> Self {
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36",
            )
            .build();
        let mut client = json!({
            "clientName": CLIENT_NAME,
            "clientVersion": identity.client_version,
            "hl": settings.hl,
            "gl": settings.gl,
        });
        if let (Some(visitor), Some(map)) = (&identity.visitor_data, client.as_object_mut()) {
            map.insert("visitorData".to_string(), Value::String(visitor.clone()));
        }
        Self {
            agent,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            context: json!({ "client": client }),
            identity,
        }
    }

    /// Fetches the home page to establish a fresh identity. A page that can
    /// be fetched but not scraped still yields a usable client.
    pub fn bootstrap(settings: &UpstreamSettings) -> UpstreamResult<Self> {
        let probe = Self::new(settings, ClientIdentity::default());
        let html = probe
            .agent
            .get(&format!("{}/", probe.base_url))
            .query("hl", &settings.hl)
            .query("gl", &settings.gl)
            .call()
            .map_err(map_ureq_error)?
            .into_string()
            .map_err(|err| UpstreamError::transport(err.to_string()))?;
        let identity = ClientIdentity::scrape(&html);
        if identity.visitor_data.is_none() {
            warn!("home page carried no visitor data; continuing with anonymous identity");
        }
        debug!(client_version = %identity.client_version, "bootstrapped upstream session");
        Ok(Self::new(settings, identity))
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    fn post_blocking(&self, endpoint: &str, mut body: Value) -> UpstreamResult<Value> {
        if let Some(map) = body.as_object_mut() {
            map.insert("context".to_string(), self.context.clone());
        }
        let url = format!("{}/youtubei/v1/{endpoint}", self.base_url);
        let mut request = self
            .agent
            .post(&url)
            .query("prettyPrint", "false")
            .set("Content-Type", "application/json")
            .set("X-Youtube-Client-Name", "1")
            .set("X-Youtube-Client-Version", &self.identity.client_version);
        if let Some(key) = &self.identity.api_key {
            request = request.query("key", key);
        }
        if let Some(visitor) = &self.identity.visitor_data {
            request = request.set("X-Goog-Visitor-Id", visitor);
        }
        request
            .send_json(body)
            .map_err(map_ureq_error)?
            .into_json::<Value>()
            .map_err(|err| UpstreamError::shape(format!("{endpoint}: {err}")))
    }

    async fn post(&self, endpoint: &'static str, body: Value) -> UpstreamResult<Value> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.post_blocking(endpoint, body))
            .await
            .map_err(|err| UpstreamError::transport(format!("request task failed: {err}")))?
    }
}

fn map_ureq_error(error: ureq::Error) -> UpstreamError {
    match error {
        ureq::Error::Status(status, _) => UpstreamError::Status { status },
        ureq::Error::Transport(transport) => UpstreamError::transport(transport.to_string()),
    }
}

fn continuation_token(node: &Value) -> Option<String> {
    find_map(node, DEFAULT_MAX_DEPTH, |map| {
        map.get("continuationCommand")
            .and_then(|command| command.get("token"))
            .or_else(|| map.get("nextContinuationData").and_then(|data| data.get("continuation")))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// The listing's own continuation: the last one in document order outside
/// reply threads, sort menus and filter chips.
pub(crate) fn listing_continuation(
    root: &Value,
    endpoint: Endpoint,
    family: ItemFamily,
) -> Option<Continuation> {
    let mut last = None;
    TreeVisitor::new(DEFAULT_MAX_DEPTH).walk(root, &mut |map| {
        if FOREIGN_CONTINUATIONS.iter().any(|key| map.contains_key(*key)) {
            return Step::Skip;
        }
        if let Some(node) = map.get("continuationItemRenderer") {
            if let Some(token) = continuation_token(node) {
                last = Some(token);
            }
            return Step::Skip;
        }
        if let Some(token) = map
            .get("nextContinuationData")
            .and_then(|data| data.get("continuation"))
            .and_then(Value::as_str)
        {
            last = Some(token.to_string());
            return Step::Skip;
        }
        Step::Descend
    });
    last.map(|token| Continuation::new(token, endpoint, family))
}

fn listing_keys() -> Vec<&'static str> {
    VIDEO_RENDERERS
        .iter()
        .chain(SEARCH_ONLY_RENDERERS)
        .copied()
        .collect()
}

pub(crate) fn listing_page(response: &Value, endpoint: Endpoint) -> Page {
    Page {
        items: collect_keyed(response, &listing_keys(), DEFAULT_MAX_DEPTH),
        continuation: listing_continuation(response, endpoint, ItemFamily::Listing),
        header: Value::Null,
    }
}

pub(crate) fn comment_page(response: &Value) -> Page {
    Page {
        items: collect_keyed(response, COMMENT_RENDERERS, DEFAULT_MAX_DEPTH),
        continuation: listing_continuation(response, Endpoint::Next, ItemFamily::Comments),
        header: Value::Null,
    }
}

/// Header and metadata of a browse response, merged into one object.
fn browse_header(response: &Value) -> Value {
    let mut header = response
        .get("header")
        .cloned()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));
    if let (Some(map), Some(metadata)) = (header.as_object_mut(), response.get("metadata")) {
        map.insert("metadata".to_string(), metadata.clone());
    }
    header
}

/// Token behind the sort chip labelled `label` on a channel tab.
pub(crate) fn sort_chip_token(response: &Value, label: &str) -> Option<String> {
    find_map(response, DEFAULT_MAX_DEPTH, |map| {
        let chip = map
            .get("chipCloudChipRenderer")
            .or_else(|| map.get("chipViewModel"))?;
        let text = chip.get("text").and_then(as_text)?;
        if !text.eq_ignore_ascii_case(label) {
            return None;
        }
        continuation_token(chip)
    })
}

/// Token that opens the comment section of a watch page.
pub(crate) fn comment_section_token(next: &Value) -> Option<String> {
    let section = find_map(next, DEFAULT_MAX_DEPTH, |map| {
        let id = map.get("sectionIdentifier").and_then(Value::as_str)?;
        if id != "comment-item-section" {
            return None;
        }
        map.get("contents")
    });
    if let Some(token) = section.and_then(continuation_token) {
        return Some(token);
    }
    let panel = find_map(next, DEFAULT_MAX_DEPTH, |map| {
        let id = map.get("panelIdentifier").and_then(Value::as_str)?;
        (id == "engagement-panel-comments-section").then_some(map)
    })?;
    continuation_token(&Value::Object(panel.clone()))
}

/// Token of the `index`th entry of the comment sort menu.
pub(crate) fn comment_sort_token(page: &Value, index: usize) -> Option<String> {
    let menu = find_key(page, "sortFilterSubMenuRenderer", DEFAULT_MAX_DEPTH)?;
    let entry = lookup(menu, &format!("subMenuItems.{index}"))?;
    continuation_token(entry)
}

fn ensure_playable(player: &Value, video_id: &str) -> UpstreamResult<()> {
    let status = lookup(player, "playabilityStatus.status").and_then(Value::as_str);
    if matches!(status, Some("ERROR")) || lookup(player, "videoDetails.videoId").is_none() {
        return Err(UpstreamError::Missing(video_id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl Upstream for InnertubeClient {
    async fn resolve_url(&self, url: &str) -> UpstreamResult<Value> {
        self.post("navigation/resolve_url", json!({ "url": url })).await
    }

    async fn search(&self, query: &str, filters: &SearchFilters) -> UpstreamResult<Page> {
        let mut body = json!({ "query": query });
        if let (Some(params), Some(map)) = (filters.to_params(), body.as_object_mut()) {
            map.insert("params".to_string(), Value::String(params));
        }
        let response = self.post("search", body).await?;
        Ok(listing_page(&response, Endpoint::Search))
    }

    async fn channel_tab(
        &self,
        channel_id: &str,
        tab: ChannelTab,
        sort: ChannelSort,
    ) -> UpstreamResult<Page> {
        let response = self
            .post(
                "browse",
                json!({ "browseId": channel_id, "params": tab.params() }),
            )
            .await?;
        let header = browse_header(&response);
        let mut page = listing_page(&response, Endpoint::Browse);
        if sort != ChannelSort::Newest {
            match sort_chip_token(&response, sort.chip_label()) {
                Some(token) => {
                    let sorted = self.post("browse", json!({ "continuation": token })).await?;
                    page = listing_page(&sorted, Endpoint::Browse);
                }
                None => debug!(channel_id, tab = tab.as_str(), "no sort chip; keeping default order"),
            }
        }
        page.header = header;
        Ok(page)
    }

    async fn playlist(&self, playlist_id: &str) -> UpstreamResult<Page> {
        let browse_id = if playlist_id.starts_with("VL") {
            playlist_id.to_string()
        } else {
            format!("VL{playlist_id}")
        };
        let response = self.post("browse", json!({ "browseId": browse_id })).await?;
        if response.get("alerts").is_some() && response.get("contents").is_none() {
            return Err(UpstreamError::Missing(playlist_id.to_string()));
        }
        let mut page = listing_page(&response, Endpoint::Browse);
        page.header = browse_header(&response);
        Ok(page)
    }

    async fn video(&self, video_id: &str) -> UpstreamResult<Value> {
        let (player, next) = futures::try_join!(
            self.post("player", json!({ "videoId": video_id })),
            self.post("next", json!({ "videoId": video_id })),
        )?;
        ensure_playable(&player, video_id)?;
        Ok(json!({ "player": player, "next": next }))
    }

    async fn comments(&self, video_id: &str, sort: CommentSort) -> UpstreamResult<Page> {
        let next = self.post("next", json!({ "videoId": video_id })).await?;
        let Some(token) = comment_section_token(&next) else {
            debug!(video_id, "comment section unavailable");
            return Ok(Page::default());
        };
        let mut response = self.post("next", json!({ "continuation": token })).await?;
        if sort.menu_index() > 0
            && let Some(sorted) = comment_sort_token(&response, sort.menu_index())
        {
            response = self.post("next", json!({ "continuation": sorted })).await?;
        }
        Ok(comment_page(&response))
    }

    async fn related(&self, video_id: &str) -> UpstreamResult<Page> {
        let next = self.post("next", json!({ "videoId": video_id })).await?;
        let Some(secondary) = find_key(&next, "secondaryResults", DEFAULT_MAX_DEPTH) else {
            return Ok(Page::default());
        };
        Ok(Page {
            items: collect_keyed(secondary, VIDEO_RENDERERS, DEFAULT_MAX_DEPTH),
            continuation: listing_continuation(secondary, Endpoint::Next, ItemFamily::Listing),
            header: Value::Null,
        })
    }

    async fn continuation(&self, continuation: &Continuation) -> UpstreamResult<Page> {
        let response = self
            .post(
                continuation.endpoint.path(),
                json!({ "continuation": continuation.token }),
            )
            .await?;
        Ok(match continuation.family {
            ItemFamily::Comments => comment_page(&response),
            ItemFamily::Listing => listing_page(&response, continuation.endpoint),
        })
    }
}

#![forbid(unsafe_code)]

//! Request flow shared by every listing: resolve, look up the cache entry,
//! start a crawl when needed, wait within the caller's budget, slice.

use futures::StreamExt;
use futures::stream;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::assembler::{Envelope, RangeRequest, slice};
use crate::cache::{CacheAdmin, CacheStore, EntityKind, EntryStatus};
use crate::config::CrawlSettings;
use crate::crawler::{PagedStrategy, Strategy};
use crate::error::{ServiceError, ServiceResult, UpstreamError};
use crate::extract::video_detail_from_payload;
use crate::fetcher::{BackgroundFetcher, CrawlJob, CrawlSummary};
use crate::records::{CacheItem, CommentRecord, SearchResultRecord, VideoDetail, VideoRecord};
use crate::resolver::Resolver;
use crate::session::{SessionFactory, SessionManager};
use crate::upstream::{ChannelContent, ChannelSort, CommentSort, SearchFilters};

/// Paging and waiting options common to every listing request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingRequest {
    pub start: Option<usize>,
    pub end: Option<usize>,
    pub wait_ms: Option<u64>,
    pub enrich: bool,
}

#[derive(Debug, Clone)]
pub struct ChannelListing {
    pub channel_id: String,
    pub page: Envelope<VideoRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheOverview {
    pub keys: Vec<String>,
    pub entries: Vec<EntryStatus>,
    pub active_crawls: Vec<CrawlSummary>,
    pub session_generation: u64,
    pub memoized_details: usize,
}

type Strategies<T> = Vec<Box<dyn Strategy<T>>>;

pub struct Aggregator {
    settings: CrawlSettings,
    sessions: SessionManager,
    resolver: Resolver,
    fetcher: BackgroundFetcher,
    channels: CacheStore<VideoRecord>,
    searches: CacheStore<SearchResultRecord>,
    comments: CacheStore<CommentRecord>,
    playlists: CacheStore<VideoRecord>,
    related: CacheStore<VideoRecord>,
    details: RwLock<HashMap<String, (Instant, VideoDetail)>>,
}

/// A missing entity is the caller's problem; anything else is the upstream's.
fn surface(error: UpstreamError) -> ServiceError {
    match error {
        UpstreamError::Missing(what) => ServiceError::NotFound(what),
        other => ServiceError::Upstream(other),
    }
}

fn require(value: &str, what: &str) -> ServiceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::invalid(format!("missing {what}")));
    }
    Ok(trimmed.to_string())
}

impl Aggregator {
    pub fn new(settings: CrawlSettings, factory: Arc<dyn SessionFactory>) -> Self {
        let store = |kind: EntityKind| settings.limits(kind).ttl();
        Self {
            sessions: SessionManager::new(factory),
            resolver: Resolver::new(
                store(EntityKind::Channel),
                settings.resolve_failures_before_reset,
            ),
            fetcher: BackgroundFetcher::new(settings.wait_poll()),
            channels: CacheStore::new(EntityKind::Channel, store(EntityKind::Channel)),
            searches: CacheStore::new(EntityKind::Search, store(EntityKind::Search)),
            comments: CacheStore::new(EntityKind::Comments, store(EntityKind::Comments)),
            playlists: CacheStore::new(EntityKind::Playlist, store(EntityKind::Playlist)),
            related: CacheStore::new(EntityKind::Related, store(EntityKind::Related)),
            details: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub async fn resolve_channel(&self, identifier: &str) -> ServiceResult<String> {
        self.resolver.resolve(&self.sessions, identifier).await
    }

    /// Uploads of a channel. `All` with the default sort also crawls the
    /// uploads playlist, which often reaches further back than the tabs.
    pub async fn channel_videos(
        &self,
        identifier: &str,
        content: ChannelContent,
        sort: ChannelSort,
        request: ListingRequest,
    ) -> ServiceResult<ChannelListing> {
        let channel_id = self.resolve_channel(identifier).await?;
        let key = EntityKind::Channel.key(&[&channel_id, content.as_str(), sort.as_str()]);
        let strategies = || {
            let mut strategies: Strategies<VideoRecord> = content
                .tabs()
                .iter()
                .map(|tab| {
                    Box::new(PagedStrategy::channel_tab(&channel_id, *tab, sort))
                        as Box<dyn Strategy<VideoRecord>>
                })
                .collect();
            if content == ChannelContent::All
                && sort == ChannelSort::Newest
                && let Some(uploads) = PagedStrategy::uploads(&channel_id)
            {
                strategies.push(Box::new(uploads));
            }
            strategies
        };
        let mut page = self.serve(&self.channels, &key, strategies, &request).await?;
        if request.enrich {
            page = self.enrich(page).await;
        }
        Ok(ChannelListing { channel_id, page })
    }

    pub async fn search(
        &self,
        query: &str,
        filters: SearchFilters,
        request: ListingRequest,
    ) -> ServiceResult<Envelope<SearchResultRecord>> {
        let query = require(query, "search query")?;
        let key = EntityKind::Search.key(&[&query.to_lowercase(), &filters.signature()]);
        let strategies = || -> Strategies<SearchResultRecord> {
            vec![Box::new(PagedStrategy::search(&query, filters))]
        };
        self.serve(&self.searches, &key, strategies, &request).await
    }

    pub async fn comments(
        &self,
        video_id: &str,
        sort: CommentSort,
        request: ListingRequest,
    ) -> ServiceResult<Envelope<CommentRecord>> {
        let video_id = require(video_id, "video id")?;
        let key = EntityKind::Comments.key(&[&video_id, sort.as_str()]);
        let strategies = || -> Strategies<CommentRecord> {
            vec![Box::new(PagedStrategy::comments(&video_id, sort))]
        };
        self.serve(&self.comments, &key, strategies, &request).await
    }

    pub async fn playlist(
        &self,
        playlist_id: &str,
        request: ListingRequest,
    ) -> ServiceResult<Envelope<VideoRecord>> {
        let playlist_id = require(playlist_id, "playlist id")?;
        let key = EntityKind::Playlist.key(&[&playlist_id]);
        let strategies = || -> Strategies<VideoRecord> {
            vec![Box::new(PagedStrategy::playlist(&playlist_id))]
        };
        let page = self.serve(&self.playlists, &key, strategies, &request).await?;
        Ok(if request.enrich {
            self.enrich(page).await
        } else {
            page
        })
    }

    pub async fn related(
        &self,
        video_id: &str,
        request: ListingRequest,
    ) -> ServiceResult<Envelope<VideoRecord>> {
        let video_id = require(video_id, "video id")?;
        let key = EntityKind::Related.key(&[&video_id]);
        let strategies = || -> Strategies<VideoRecord> {
            vec![Box::new(PagedStrategy::related(&video_id))]
        };
        self.serve(&self.related, &key, strategies, &request).await
    }

    /// Full metadata of one video, memoized for the search TTL.
    pub async fn video_detail(&self, video_id: &str) -> ServiceResult<VideoDetail> {
        let video_id = require(video_id, "video id")?;
        let ttl = self.settings.search.ttl();
        if let Some((at, detail)) = self.details.read().get(&video_id)
            && at.elapsed() < ttl
        {
            return Ok(detail.clone());
        }

        let session = self.sessions.get().await?;
        let payload = session.upstream.video(&video_id).await.map_err(surface)?;
        let detail = video_detail_from_payload(&payload).ok_or_else(|| {
            ServiceError::Upstream(UpstreamError::shape(format!(
                "watch page for {video_id} carried no video details"
            )))
        })?;
        self.details
            .write()
            .insert(video_id, (Instant::now(), detail.clone()));
        Ok(detail)
    }

    async fn serve<T: CacheItem>(
        &self,
        store: &CacheStore<T>,
        key: &str,
        strategies: impl FnOnce() -> Strategies<T>,
        request: &ListingRequest,
    ) -> ServiceResult<Envelope<T>> {
        let range = RangeRequest::from_params(request.start, request.end, self.settings.default_window);
        let entry = store.get_or_create(key);

        if entry.read(|state| !state.is_complete() && !state.is_fetching()) {
            let session = self.sessions.get().await?;
            let job = CrawlJob {
                upstream: session.upstream,
                strategies: strategies(),
                limits: self.settings.limits(store.kind()).clone(),
            };
            self.fetcher.ensure_fetching(&entry, job);
        }

        let budget = self.settings.wait_budget(request.wait_ms);
        let met = self
            .fetcher
            .wait_for(&entry, range.required_items(), budget)
            .await;
        debug!(key, met, wait_ms = budget.as_millis() as u64, "serving cached listing");

        let (envelope, failure) = entry.read(|state| {
            let failure = if state.failed_empty() {
                state.error().cloned()
            } else {
                None
            };
            (slice(state, range), failure)
        });
        if let Some(error) = failure {
            // Nothing was gathered; drop the entry so the next request retries.
            store.evict_handle(&entry);
            return Err(surface(error));
        }
        Ok(envelope)
    }

    async fn enrich(&self, mut page: Envelope<VideoRecord>) -> Envelope<VideoRecord> {
        let ids: Vec<String> = page.items.iter().map(|video| video.id.clone()).collect();
        let details: Vec<Option<VideoDetail>> = stream::iter(ids)
            .map(|id| async move {
                match self.video_detail(&id).await {
                    Ok(detail) => Some(detail),
                    Err(err) => {
                        debug!(video_id = %id, error = %err, "enrichment skipped");
                        None
                    }
                }
            })
            .buffered(self.settings.enrich_concurrency.max(1))
            .collect()
            .await;
        for (video, detail) in page.items.iter_mut().zip(details) {
            if let Some(detail) = detail {
                video.enrich_with(&detail);
            }
        }
        page
    }

    fn stores(&self) -> [&dyn CacheAdmin; 5] {
        [
            &self.channels,
            &self.searches,
            &self.comments,
            &self.playlists,
            &self.related,
        ]
    }

    fn store_for(&self, key: &str) -> Option<&dyn CacheAdmin> {
        let kind = EntityKind::of_key(key)?;
        self.stores().into_iter().find(|store| store.kind() == kind)
    }

    pub fn cache_status(&self, key: &str) -> Option<EntryStatus> {
        self.store_for(key)?.status(key)
    }

    pub fn cache_overview(&self) -> CacheOverview {
        CacheOverview {
            keys: self
                .stores()
                .into_iter()
                .flat_map(|store| store.keys())
                .collect(),
            entries: self
                .stores()
                .into_iter()
                .flat_map(|store| store.statuses())
                .collect(),
            active_crawls: self.fetcher.active(),
            session_generation: self.sessions.generation(),
            memoized_details: self.details.read().len(),
        }
    }

    pub fn evict(&self, key: &str) -> bool {
        let evicted = self.store_for(key).is_some_and(|store| store.evict(key));
        if evicted {
            info!(key, "cache entry evicted");
        }
        evicted
    }

    /// Empties every store and memo. Running crawls finish into their
    /// detached entries.
    pub fn clear_all(&self) -> usize {
        let cleared: usize = self.stores().into_iter().map(|store| store.clear()).sum();
        self.details.write().clear();
        self.resolver.forget_all();
        info!(cleared, "cache cleared");
        cleared
    }

    /// Discards the upstream session; the next call builds a fresh one.
    pub async fn reset_session(&self) -> ServiceResult<u64> {
        let session = self.sessions.reset().await?;
        Ok(session.generation)
    }

    pub fn shutdown(&self) {
        self.fetcher.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FetchStatus;
    use std::time::Duration;
    use crate::testing::{
        CountingFactory, Scripted, ScriptedUpstream, comment_item, numbered_pages, video_item,
    };

    const CHANNEL: &str = "UCabcdefghijklmnopqrstuv";

    fn settings() -> CrawlSettings {
        let mut settings = CrawlSettings::default();
        for kind in EntityKind::ALL {
            let limits = match kind {
                EntityKind::Channel => &mut settings.channel,
                EntityKind::Search => &mut settings.search,
                EntityKind::Comments => &mut settings.comments,
                EntityKind::Playlist => &mut settings.playlist,
                EntityKind::Related => &mut settings.related,
            };
            limits.inter_page_delay_ms = 0;
        }
        settings.wait_poll_ms = 5;
        settings
    }

    fn aggregator(upstream: ScriptedUpstream) -> (Arc<ScriptedUpstream>, Aggregator) {
        let upstream = Arc::new(upstream);
        let factory = Arc::new(CountingFactory::shared(upstream.clone()));
        (upstream, Aggregator::new(settings(), factory))
    }

    fn wait(ms: u64) -> ListingRequest {
        ListingRequest {
            wait_ms: Some(ms),
            ..ListingRequest::default()
        }
    }

    fn ids<T: CacheItem>(items: &[T]) -> Vec<String> {
        items.iter().map(|item| item.item_id().to_string()).collect()
    }

    #[tokio::test]
    async fn first_request_reports_fetching_and_reuses_entry() {
        let (upstream, service) = aggregator(
            ScriptedUpstream::new()
                .pages(
                    &format!("tab:{CHANNEL}:videos:newest"),
                    numbered_pages("v", 3, 2),
                )
                .delay(Duration::from_millis(20)),
        );

        let first = service
            .channel_videos(CHANNEL, ChannelContent::Videos, ChannelSort::Newest, wait(0))
            .await
            .unwrap();
        assert_eq!(first.channel_id, CHANNEL);
        assert_eq!(first.page.status, FetchStatus::Fetching);
        assert_eq!(first.page.total_cached, 0);
        assert!(first.page.items.is_empty());
        assert!(first.page.has_more);

        let second = service
            .channel_videos(CHANNEL, ChannelContent::Videos, ChannelSort::Newest, wait(5_000))
            .await
            .unwrap();
        assert_eq!(second.page.status, FetchStatus::Complete);
        assert_eq!(ids(&second.page.items), vec!["v0", "v1", "v2", "v3", "v4", "v5"]);
        assert_eq!(
            upstream.calls(&format!("tab:{CHANNEL}:videos:newest#0")),
            1
        );
    }

    #[tokio::test]
    async fn evicting_mid_crawl_does_not_start_a_second_crawl() {
        let seed = format!("tab:{CHANNEL}:videos:newest");
        let (upstream, service) = aggregator(
            ScriptedUpstream::new()
                .pages(&seed, numbered_pages("v", 4, 1))
                .delay(Duration::from_millis(20)),
        );
        service
            .channel_videos(CHANNEL, ChannelContent::Videos, ChannelSort::Newest, wait(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let key = EntityKind::Channel.key(&[CHANNEL, "videos", "newest"]);
        assert!(service.evict(&key));

        let again = service
            .channel_videos(CHANNEL, ChannelContent::Videos, ChannelSort::Newest, wait(0))
            .await
            .unwrap();
        assert_eq!(again.page.total_cached, 0);
        assert_eq!(upstream.calls(&format!("{seed}#0")), 1);
        assert_eq!(service.cache_overview().active_crawls.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_crawl() {
        let (upstream, service) = aggregator(
            ScriptedUpstream::new()
                .pages(
                    &format!("tab:{CHANNEL}:videos:newest"),
                    numbered_pages("v", 2, 3),
                )
                .delay(Duration::from_millis(10)),
        );
        let (a, b) = tokio::join!(
            service.channel_videos(CHANNEL, ChannelContent::Videos, ChannelSort::Newest, wait(5_000)),
            service.channel_videos(CHANNEL, ChannelContent::Videos, ChannelSort::Newest, wait(5_000)),
        );
        assert_eq!(ids(&a.unwrap().page.items), ids(&b.unwrap().page.items));
        assert_eq!(
            upstream.calls(&format!("tab:{CHANNEL}:videos:newest#0")),
            1
        );
    }

    #[tokio::test]
    async fn all_content_adds_uploads_playlist() {
        let uploads = format!("playlist:UU{}", &CHANNEL[2..]);
        let (upstream, service) = aggregator(
            ScriptedUpstream::new()
                .pages(
                    &format!("tab:{CHANNEL}:videos:newest"),
                    vec![vec![video_item("a"), video_item("b")]],
                )
                .pages(&uploads, vec![vec![video_item("b"), video_item("c")]]),
        );
        let listing = service
            .channel_videos(CHANNEL, ChannelContent::All, ChannelSort::Newest, wait(5_000))
            .await
            .unwrap();
        let mut found = ids(&listing.page.items);
        found.sort();
        assert_eq!(found, vec!["a", "b", "c"]);
        assert_eq!(upstream.calls(&uploads), 1);
        assert_eq!(upstream.calls(&format!("tab:{CHANNEL}:shorts")), 1);
        assert_eq!(upstream.calls(&format!("tab:{CHANNEL}:live")), 1);
    }

    #[tokio::test]
    async fn complete_search_slices_first_window() {
        let (_, service) = aggregator(
            ScriptedUpstream::new().pages("search:lofi", numbered_pages("s", 7, 5)),
        );
        let filters = SearchFilters::default();
        let full = service
            .search(
                "lofi",
                filters,
                ListingRequest {
                    end: Some(100),
                    wait_ms: Some(5_000),
                    ..ListingRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(full.total_cached, 35);
        assert_eq!(full.status, FetchStatus::Complete);

        let window = service
            .search(
                "  LOFI ",
                filters,
                ListingRequest {
                    start: Some(1),
                    end: Some(20),
                    wait_ms: Some(0),
                    enrich: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(window.total_returned, 20);
        assert_eq!(window.items[0].id, "s0");
        assert_eq!(window.items[19].id, "s19");
        assert!(window.has_more);
    }

    #[tokio::test]
    async fn comment_failure_keeps_earlier_pages() {
        let (_, service) = aggregator(ScriptedUpstream::new().script(
            "comments:vid:top",
            vec![
                Scripted::Items(vec![comment_item("c1"), comment_item("c2")]),
                Scripted::Items(vec![comment_item("c3")]),
                Scripted::Fail(UpstreamError::Status { status: 503 }),
            ],
        ));
        let page = service
            .comments("vid", CommentSort::Top, wait(5_000))
            .await
            .unwrap();
        assert_eq!(page.status, FetchStatus::Complete);
        assert_eq!(ids(&page.items), vec!["c1", "c2", "c3"]);
        assert!(page.error.is_some());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn failure_with_nothing_gathered_surfaces_and_retries() {
        let (upstream, service) = aggregator(ScriptedUpstream::new().script(
            "related:vid",
            vec![Scripted::Fail(UpstreamError::transport("connection reset"))],
        ));
        let err = service.related("vid", wait(5_000)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Upstream(_)));
        assert!(service.cache_status("related:vid").is_none());

        let _ = service.related("vid", wait(5_000)).await;
        assert_eq!(upstream.calls("related:vid#0"), 2);
    }

    #[tokio::test]
    async fn missing_playlist_is_not_found() {
        let (_, service) = aggregator(ScriptedUpstream::new().script(
            "playlist:PLgone",
            vec![Scripted::Fail(UpstreamError::Missing("PLgone".to_string()))],
        ));
        let err = service.playlist("PLgone", wait(5_000)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn enrichment_merges_video_details() {
        let (upstream, service) = aggregator(
            ScriptedUpstream::new()
                .pages("playlist:PL1", vec![vec![video_item("a"), video_item("b")]])
                .video("a", "Full title A"),
        );
        let page = service
            .playlist(
                "PL1",
                ListingRequest {
                    wait_ms: Some(5_000),
                    enrich: true,
                    ..ListingRequest::default()
                },
            )
            .await
            .unwrap();
        let a = &page.items[0];
        assert_eq!(a.tags, vec!["demo".to_string()]);
        assert_eq!(a.hashtags, vec!["#demo".to_string()]);
        assert_eq!(a.upload_date.as_deref(), Some("2024-05-01"));
        let b = &page.items[1];
        assert!(b.tags.is_empty());
        assert_eq!(upstream.calls("video:"), 2);
    }

    #[tokio::test]
    async fn video_detail_is_memoized() {
        let (upstream, service) = aggregator(ScriptedUpstream::new().video("abc", "Title"));
        let first = service.video_detail("abc").await.unwrap();
        let second = service.video_detail("abc").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.video.title, "Title");
        assert_eq!(upstream.calls("video:abc"), 1);
        assert!(matches!(
            service.video_detail("nope").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (upstream, service) = aggregator(ScriptedUpstream::new());
        let err = service
            .search("   ", SearchFilters::default(), wait(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
        assert_eq!(upstream.calls(""), 0);
    }

    #[tokio::test]
    async fn cache_administration() {
        let (_, service) = aggregator(
            ScriptedUpstream::new().pages("search:jazz", numbered_pages("j", 1, 3)),
        );
        service
            .search("jazz", SearchFilters::default(), wait(5_000))
            .await
            .unwrap();
        let key = EntityKind::Search.key(&["jazz", &SearchFilters::default().signature()]);

        let status = service.cache_status(&key).unwrap();
        assert_eq!(status.total_cached, 3);
        assert_eq!(status.strategies.len(), 1);

        let overview = service.cache_overview();
        assert_eq!(overview.entries.len(), 1);
        assert_eq!(overview.keys, vec![key.clone()]);
        assert_eq!(overview.session_generation, 1);

        assert!(service.evict(&key));
        assert!(!service.evict(&key));
        assert!(!service.evict("bogus:key"));
        assert_eq!(service.clear_all(), 0);
    }

    #[tokio::test]
    async fn reset_session_advances_generation() {
        let (_, service) = aggregator(ScriptedUpstream::new());
        assert_eq!(service.reset_session().await.unwrap(), 1);
        assert_eq!(service.reset_session().await.unwrap(), 2);
    }
}

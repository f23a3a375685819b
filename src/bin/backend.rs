#![forbid(unsafe_code)]

//! Axum front end for the aggregation layer.
//!
//! Every listing route answers straight from the cache and, when the cache is
//! short, kicks off a background crawl and waits a bounded time for it. The
//! handlers stay thin: parse the query, call the [`Aggregator`], rename the
//! envelope fields for the route.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tubecache::assembler::Envelope;
use tubecache::config::{CrawlSettings, RuntimeOverrides, resolve_runtime_settings};
use tubecache::error::ServiceError;
use tubecache::service::{Aggregator, ListingRequest};
use tubecache::session::InnertubeSessionFactory;
use tubecache::upstream::{
    ChannelContent, ChannelSort, CommentSort, DurationFilter, SearchFilters, SearchSort,
    SearchType, UploadDateFilter,
};

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Caching aggregation API over YouTube listings")]
struct BackendArgs {
    /// Address to listen on (overrides TUBECACHE_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides TUBECACHE_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// TOML file with crawl tunables (overrides TUBECACHE_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Alternate `.env` file.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            config_path: self.config,
            env_path: self.env_file,
        }
    }
}

#[derive(Clone)]
struct AppState {
    aggregator: Arc<Aggregator>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Creates a 400 error with the provided message.
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Creates a 404 error with the provided message.
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// Creates a 500 error with the provided message.
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        }
        let body = json!({
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let runtime = resolve_runtime_settings(BackendArgs::parse().overrides())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&runtime.log_filter)
                .with_context(|| format!("parsing log filter {:?}", runtime.log_filter))?,
        )
        .init();

    let settings = CrawlSettings::load(runtime.config_path.as_deref())?;
    let factory = Arc::new(InnertubeSessionFactory::new(settings.upstream.clone()));
    let aggregator = Arc::new(Aggregator::new(settings, factory));
    let state = AppState {
        aggregator: Arc::clone(&aggregator),
    };

    let listener = tokio::net::TcpListener::bind((runtime.host.as_str(), runtime.port))
        .await
        .with_context(|| format!("binding to {}:{}", runtime.host, runtime.port))?;
    info!(host = %runtime.host, port = runtime.port, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    aggregator.shutdown();
    info!("API server stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", get(search))
        .route("/api/channel/{identifier}/videos", get(channel_videos))
        .route("/api/channel/{identifier}/resolve", get(resolve_channel))
        .route("/api/playlist/{id}", get(playlist))
        .route("/api/video/{id}", get(video_detail))
        .route("/api/video/{id}/comments", get(video_comments))
        .route("/api/video/{id}/related", get(related_videos))
        .route("/api/cache", get(cache_overview).delete(evict_entry))
        .route("/api/cache/status", get(cache_status))
        .route("/api/cache/all", delete(clear_cache))
        .route("/api/session/reset", post(reset_session))
        .fallback(|| async { ApiError::not_found("endpoint not found") })
        .with_state(state)
}

async fn shutdown_signal() {
    // Failing to install the handler only costs the graceful part of shutdown.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    start: Option<usize>,
    end: Option<usize>,
    wait: Option<u64>,
    enrich: Option<bool>,
}

impl PageQuery {
    fn listing(&self) -> ListingRequest {
        ListingRequest {
            start: self.start,
            end: self.end,
            wait_ms: self.wait,
            enrich: self.enrich.unwrap_or(false),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchQuery {
    q: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    sort: Option<String>,
    duration: Option<String>,
    upload_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelQuery {
    #[serde(rename = "type")]
    content: Option<String>,
    sort: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommentQuery {
    sort: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Parses an optional filter value. Empty means default; unknown values are
/// a bad request.
fn parse_param<T: Default>(
    value: Option<&str>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> ApiResult<T> {
    match value.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(raw) => parse(&raw.to_ascii_lowercase())
            .ok_or_else(|| ApiError::bad_request(format!("unsupported {name} {raw:?}"))),
    }
}

impl SearchQuery {
    fn filters(&self) -> ApiResult<SearchFilters> {
        Ok(SearchFilters {
            kind: parse_param(self.kind.as_deref(), "type", SearchType::parse)?,
            sort: parse_param(self.sort.as_deref(), "sort", SearchSort::parse)?,
            duration: parse_param(self.duration.as_deref(), "duration", DurationFilter::parse)?,
            upload_date: parse_param(
                self.upload_date.as_deref(),
                "uploadDate",
                UploadDateFilter::parse,
            )?,
        })
    }
}

fn required_key(query: &KeyQuery) -> ApiResult<&str> {
    query
        .key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing key parameter"))
}

/// Renders an envelope as `{success, <items_key>, cacheStatus, ...}`.
fn listing_body<T: Serialize>(
    envelope: Envelope<T>,
    items_key: &str,
    extra: impl IntoIterator<Item = (&'static str, Value)>,
) -> ApiResult<Json<Value>> {
    let Value::Object(mut fields) =
        serde_json::to_value(envelope).map_err(|err| ApiError::internal(err.to_string()))?
    else {
        return Err(ApiError::internal("envelope did not serialize to an object"));
    };
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    for (key, value) in extra {
        body.insert(key.to_string(), value);
    }
    if let Some(items) = fields.remove("items") {
        body.insert(items_key.to_string(), items);
    }
    if let Some(status) = fields.remove("status") {
        body.insert("cacheStatus".to_string(), status);
    }
    body.extend(fields);
    Ok(Json(Value::Object(body)))
}

fn success(payload: impl Serialize) -> ApiResult<Json<Value>> {
    let mut value =
        serde_json::to_value(payload).map_err(|err| ApiError::internal(err.to_string()))?;
    if let Value::Object(fields) = &mut value {
        fields.insert("success".to_string(), Value::Bool(true));
        return Ok(Json(value));
    }
    Ok(Json(json!({ "success": true, "data": value })))
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let filters = query.filters()?;
    let text = query.q.as_deref().unwrap_or_default();
    let envelope = state
        .aggregator
        .search(text, filters, page.listing())
        .await?;
    listing_body(envelope, "results", [("query", json!(text.trim()))])
}

async fn channel_videos(
    State(state): State<AppState>,
    AxumPath(identifier): AxumPath<String>,
    Query(query): Query<ChannelQuery>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let content = parse_param(query.content.as_deref(), "type", ChannelContent::parse)?;
    let sort = parse_param(query.sort.as_deref(), "sort", ChannelSort::parse)?;
    let listing = state
        .aggregator
        .channel_videos(&identifier, content, sort, page.listing())
        .await?;
    listing_body(
        listing.page,
        "videos",
        [
            ("channelId", json!(listing.channel_id)),
            ("type", json!(content.as_str())),
            ("sort", json!(sort.as_str())),
        ],
    )
}

async fn resolve_channel(
    State(state): State<AppState>,
    AxumPath(identifier): AxumPath<String>,
) -> ApiResult<Json<Value>> {
    let channel_id = state.aggregator.resolve_channel(&identifier).await?;
    Ok(Json(json!({
        "success": true,
        "identifier": identifier,
        "channelId": channel_id,
    })))
}

async fn playlist(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let envelope = state.aggregator.playlist(&id, query.listing()).await?;
    listing_body(envelope, "videos", [("playlistId", json!(id))])
}

async fn video_detail(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<Value>> {
    let detail = state.aggregator.video_detail(&id).await?;
    Ok(Json(json!({ "success": true, "video": detail })))
}

async fn video_comments(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<CommentQuery>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let sort = parse_param(query.sort.as_deref(), "sort", CommentSort::parse)?;
    let envelope = state
        .aggregator
        .comments(&id, sort, page.listing())
        .await?;
    listing_body(
        envelope,
        "comments",
        [("videoId", json!(id)), ("sort", json!(sort.as_str()))],
    )
}

async fn related_videos(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let envelope = state.aggregator.related(&id, query.listing()).await?;
    listing_body(envelope, "videos", [("videoId", json!(id))])
}

async fn cache_overview(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    success(state.aggregator.cache_overview())
}

async fn cache_status(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Json<Value>> {
    let key = required_key(&query)?;
    let status = state
        .aggregator
        .cache_status(key)
        .ok_or_else(|| ApiError::not_found(format!("no cache entry for {key}")))?;
    Ok(Json(json!({ "success": true, "entry": status })))
}

async fn evict_entry(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Json<Value>> {
    let key = required_key(&query)?;
    if !state.aggregator.evict(key) {
        return Err(ApiError::not_found(format!("no cache entry for {key}")));
    }
    Ok(Json(json!({ "success": true, "evicted": key })))
}

async fn clear_cache(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let cleared = state.aggregator.clear_all();
    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

async fn reset_session(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let generation = state.aggregator.reset_session().await?;
    info!(generation, "session reset on request");
    Ok(Json(json!({ "success": true, "generation": generation })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tubecache::error::UpstreamError;
    use tubecache::session::SessionFactory;
    use tubecache::upstream::{ChannelTab, Continuation, Page, Upstream, UpstreamResult};

    const CHANNEL: &str = "UCabcdefghijklmnopqrstuv";

    /// Answers every search with the same single page and knows no videos.
    struct StubUpstream {
        results: Vec<Value>,
    }

    #[async_trait]
    impl Upstream for StubUpstream {
        async fn resolve_url(&self, _url: &str) -> UpstreamResult<Value> {
            Err(UpstreamError::Status { status: 404 })
        }

        async fn search(&self, _query: &str, _filters: &SearchFilters) -> UpstreamResult<Page> {
            Ok(Page {
                items: self.results.clone(),
                ..Page::default()
            })
        }

        async fn channel_tab(
            &self,
            _channel_id: &str,
            _tab: ChannelTab,
            _sort: ChannelSort,
        ) -> UpstreamResult<Page> {
            Ok(Page::default())
        }

        async fn playlist(&self, _playlist_id: &str) -> UpstreamResult<Page> {
            Ok(Page::default())
        }

        async fn video(&self, video_id: &str) -> UpstreamResult<Value> {
            Err(UpstreamError::Missing(video_id.to_string()))
        }

        async fn comments(&self, _video_id: &str, _sort: CommentSort) -> UpstreamResult<Page> {
            Err(UpstreamError::Status { status: 503 })
        }

        async fn related(&self, _video_id: &str) -> UpstreamResult<Page> {
            Ok(Page::default())
        }

        async fn continuation(&self, _continuation: &Continuation) -> UpstreamResult<Page> {
            Ok(Page::default())
        }
    }

    struct StubFactory {
        upstream: Arc<StubUpstream>,
    }

    #[async_trait]
    impl SessionFactory for StubFactory {
        async fn create(&self) -> UpstreamResult<Arc<dyn Upstream>> {
            Ok(self.upstream.clone())
        }
    }

    fn video(id: &str) -> Value {
        json!({"videoRenderer": {
            "videoId": id,
            "title": {"runs": [{"text": format!("Video {id}")}]}
        }})
    }

    fn state() -> AppState {
        let upstream = Arc::new(StubUpstream {
            results: (0..5).map(|n| video(&format!("v{n}"))).collect(),
        });
        let factory = Arc::new(StubFactory { upstream });
        AppState {
            aggregator: Arc::new(Aggregator::new(CrawlSettings::default(), factory)),
        }
    }

    fn page(wait: u64) -> PageQuery {
        PageQuery {
            wait: Some(wait),
            ..PageQuery::default()
        }
    }

    #[test]
    fn cli_flags_become_overrides() {
        let args = BackendArgs::try_parse_from([
            "backend",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--config",
            "crawl.toml",
        ])
        .unwrap();
        let overrides = args.overrides();
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.config_path, Some(PathBuf::from("crawl.toml")));
        assert!(overrides.env_path.is_none());
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::not_found("channel @x"), StatusCode::NOT_FOUND),
            (
                ServiceError::Upstream(UpstreamError::transport("reset")),
                StatusCode::BAD_GATEWAY,
            ),
            (ServiceError::invalid("bad"), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn unknown_filter_values_are_rejected() {
        let query = SearchQuery {
            sort: Some("loudest".to_string()),
            ..SearchQuery::default()
        };
        let err = query.filters().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let query = SearchQuery {
            kind: Some("Channel".to_string()),
            upload_date: Some("week".to_string()),
            ..SearchQuery::default()
        };
        let filters = query.filters().unwrap();
        assert_eq!(filters.kind, SearchType::Channel);
        assert_eq!(filters.upload_date, UploadDateFilter::Week);
    }

    #[tokio::test]
    async fn search_renames_envelope_fields() {
        let query = SearchQuery {
            q: Some("lofi".to_string()),
            ..SearchQuery::default()
        };
        let Json(body) = search(State(state()), Query(query), Query(page(5_000)))
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["query"], "lofi");
        assert_eq!(body["cacheStatus"], "complete");
        assert_eq!(body["results"].as_array().unwrap().len(), 5);
        assert_eq!(body["totalCached"], 5);
        assert_eq!(body["hasMore"], false);
        assert!(body.get("items").is_none());
        assert!(body.get("status").is_none());
    }

    #[tokio::test]
    async fn search_without_query_is_bad_request() {
        let err = search(
            State(state()),
            Query(SearchQuery::default()),
            Query(PageQuery::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn channel_id_resolves_without_upstream() {
        let Json(body) = resolve_channel(State(state()), AxumPath(CHANNEL.to_string()))
            .await
            .unwrap();
        assert_eq!(body["channelId"], CHANNEL);

        let err = resolve_channel(State(state()), AxumPath("@nobody".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failing_comments_surface_as_bad_gateway() {
        let err = video_comments(
            State(state()),
            AxumPath("vid".to_string()),
            Query(CommentQuery { sort: None }),
            Query(page(5_000)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unknown_video_is_not_found() {
        let err = video_detail(State(state()), AxumPath("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cache_routes_report_and_evict() {
        let state = state();
        let query = SearchQuery {
            q: Some("jazz".to_string()),
            ..SearchQuery::default()
        };
        search(State(state.clone()), Query(query), Query(page(5_000)))
            .await
            .unwrap();

        let Json(overview) = cache_overview(State(state.clone())).await.unwrap();
        assert_eq!(overview["success"], true);
        let key = overview["keys"][0].as_str().unwrap().to_string();
        assert!(key.starts_with("search:jazz"));

        let Json(status) = cache_status(
            State(state.clone()),
            Query(KeyQuery {
                key: Some(key.clone()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status["entry"]["totalCached"], 5);

        evict_entry(State(state.clone()), Query(KeyQuery { key: Some(key.clone()) }))
            .await
            .unwrap();
        let err = evict_entry(State(state.clone()), Query(KeyQuery { key: Some(key) }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = cache_status(State(state.clone()), Query(KeyQuery { key: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let Json(cleared) = clear_cache(State(state)).await.unwrap();
        assert_eq!(cleared["cleared"], 0);
    }

    #[tokio::test]
    async fn session_reset_reports_generation() {
        let Json(body) = reset_session(State(state())).await.unwrap();
        assert_eq!(body["generation"], 1);
    }
}

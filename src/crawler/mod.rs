#![forbid(unsafe_code)]

//! Pagination crawler.
//!
//! A [`Strategy`] knows how to open one listing and turn its pages into
//! records; [`crawl`] drives it page by page into a cache entry until the
//! listing is exhausted, stops producing anything new, hits its page ceiling
//! or fails.

mod strategies;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{EntryHandle, StopReason, StrategyReport};
use crate::config::CrawlLimits;
use crate::records::CacheItem;
use crate::upstream::{Continuation, Page, Upstream, UpstreamResult};

pub use strategies::{PagedStrategy, Seed};

#[async_trait]
pub trait Strategy<T: CacheItem>: Send + Sync {
    fn name(&self) -> &str;

    async fn seed(&self, upstream: &dyn Upstream) -> UpstreamResult<Page>;

    fn extract_items(&self, page: &Page) -> Vec<T>;

    fn extract_token(&self, page: &Page) -> Option<Continuation> {
        page.continuation.clone()
    }

    async fn next(&self, upstream: &dyn Upstream, token: &Continuation) -> UpstreamResult<Page> {
        upstream.continuation(token).await
    }

    /// Entity metadata worth keeping next to the items (channel header,
    /// playlist title). Only consulted for the seed page.
    fn capture_context(&self, _page: &Page) -> Option<Value> {
        None
    }
}

struct Progress {
    report: StrategyReport,
    stalled: usize,
}

impl Progress {
    fn new(name: &str) -> Self {
        Self {
            report: StrategyReport {
                strategy: name.to_string(),
                pages: 0,
                admitted: 0,
                stop: StopReason::Exhausted,
                error: None,
            },
            stalled: 0,
        }
    }

    fn stop(mut self, reason: StopReason) -> StrategyReport {
        self.report.stop = reason;
        info!(
            strategy = %self.report.strategy,
            pages = self.report.pages,
            admitted = self.report.admitted,
            stop = ?reason,
            "crawl strategy finished"
        );
        self.report
    }
}

/// Runs one strategy to completion against `entry`.
///
/// Never fails: an upstream error ends the strategy with
/// [`StopReason::UpstreamError`] and is recorded on the entry, keeping
/// whatever earlier pages admitted.
pub async fn crawl<T: CacheItem>(
    strategy: &dyn Strategy<T>,
    upstream: &dyn Upstream,
    entry: &EntryHandle<T>,
    limits: &CrawlLimits,
) -> StrategyReport {
    let mut progress = Progress::new(strategy.name());

    let mut page = match strategy.seed(upstream).await {
        Ok(page) => page,
        Err(err) => return fail(progress, entry, err),
    };
    if let Some(context) = strategy.capture_context(&page) {
        entry.update(|state| state.set_context(context));
    }

    loop {
        progress.report.pages += 1;
        let items = strategy.extract_items(&page);
        let token = strategy.extract_token(&page);
        let offered = items.len();
        let admitted = entry.update(|state| {
            let admitted = state.merge(items);
            state.set_continuation(token.clone());
            admitted
        });
        progress.report.admitted += admitted;
        if admitted == 0 {
            progress.stalled += 1;
        } else {
            progress.stalled = 0;
        }
        debug!(
            key = entry.key(),
            strategy = strategy.name(),
            page = progress.report.pages,
            offered,
            admitted,
            "page merged"
        );

        let Some(token) = token else {
            return progress.stop(StopReason::Exhausted);
        };
        if progress.stalled >= limits.stall_threshold {
            return progress.stop(StopReason::Stalled);
        }
        if progress.report.pages >= limits.max_pages {
            return progress.stop(StopReason::PageLimit);
        }
        if limits.rate_limit_every > 0
            && progress.report.pages % limits.rate_limit_every == 0
            && !limits.inter_page_delay().is_zero()
        {
            tokio::time::sleep(limits.inter_page_delay()).await;
        }

        page = match strategy.next(upstream, &token).await {
            Ok(page) => page,
            Err(err) => return fail(progress, entry, err),
        };
    }
}

fn fail<T: CacheItem>(
    mut progress: Progress,
    entry: &EntryHandle<T>,
    err: crate::error::UpstreamError,
) -> StrategyReport {
    warn!(
        key = entry.key(),
        strategy = %progress.report.strategy,
        pages = progress.report.pages,
        error = %err,
        "crawl strategy stopped on upstream error"
    );
    progress.report.error = Some(err.to_string());
    entry.update(|state| state.record_error(err));
    progress.stop(StopReason::UpstreamError)
}

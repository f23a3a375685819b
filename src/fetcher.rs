#![forbid(unsafe_code)]

//! Background fetch orchestration.
//!
//! [`BackgroundFetcher::ensure_fetching`] claims an entry and spawns one
//! supervised task that runs every strategy of the listing concurrently into
//! it. The claim happens under the entry lock, so at most one crawl writes
//! into an entry at a time, and a drop guard releases the claim even when the
//! task panics.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::cache::EntryHandle;
use crate::config::CrawlLimits;
use crate::crawler::{Strategy, crawl};
use crate::records::CacheItem;
use crate::upstream::Upstream;

/// Everything a crawl needs once spawned.
pub struct CrawlJob<T> {
    pub upstream: Arc<dyn Upstream>,
    pub strategies: Vec<Box<dyn Strategy<T>>>,
    pub limits: CrawlLimits,
}

struct RunningCrawl {
    id: u64,
    started_at: DateTime<Utc>,
    strategies: usize,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub key: String,
    pub started_at: DateTime<Utc>,
    pub strategies: usize,
}

#[derive(Clone)]
pub struct BackgroundFetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    jobs: Mutex<HashMap<String, RunningCrawl>>,
    counter: AtomicU64,
    poll: Duration,
}

/// Releases the entry's claim however the crawl task ends.
struct ClaimGuard<T: CacheItem> {
    entry: Arc<EntryHandle<T>>,
}

impl<T: CacheItem> Drop for ClaimGuard<T> {
    fn drop(&mut self) {
        self.entry.update(|state| state.abandon());
    }
}

impl BackgroundFetcher {
    pub fn new(poll: Duration) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                jobs: Mutex::new(HashMap::new()),
                counter: AtomicU64::new(1),
                poll,
            }),
        }
    }

    /// Starts a crawl for `entry` unless the entry is complete or a crawl for
    /// its key is still running, including one writing into an evicted copy.
    /// Returns whether a crawl was started.
    pub fn ensure_fetching<T: CacheItem>(&self, entry: &Arc<EntryHandle<T>>, job: CrawlJob<T>) -> bool {
        let key = entry.key().to_string();
        // Held until the job is registered, so the task's `forget` always
        // finds its own slot. Lock order: jobs, then entry.
        let mut jobs = self.inner.jobs.lock();
        if jobs.get(&key).is_some_and(|job| !job.handle.is_finished()) {
            debug!(key = %key, "crawl for key still running; not starting another");
            return false;
        }
        if !entry.update(|state| state.try_claim()) {
            return false;
        }
        let id = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let strategies = job.strategies.len();
        info!(key = %key, strategies, "starting background crawl");

        let guard = ClaimGuard {
            entry: Arc::clone(entry),
        };
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let guard = guard;
            let CrawlJob {
                upstream,
                strategies,
                limits,
            } = job;
            let entry = &guard.entry;
            let reports = join_all(
                strategies
                    .iter()
                    .map(|strategy| crawl(strategy.as_ref(), upstream.as_ref(), entry, &limits)),
            )
            .await;
            let total = entry.update(|state| {
                state.finish(reports);
                state.len()
            });
            info!(key = %task_key, total, "background crawl complete");
            drop(guard);
            inner.forget(&task_key, id);
        });

        jobs.insert(
            key,
            RunningCrawl {
                id,
                started_at: Utc::now(),
                strategies,
                handle,
            },
        );
        true
    }

    /// See [`EntryHandle::wait_for`]; polls at the configured interval.
    pub async fn wait_for<T: CacheItem>(
        &self,
        entry: &EntryHandle<T>,
        min_items: usize,
        max_wait: Duration,
    ) -> bool {
        if max_wait.is_zero() {
            return entry.read(|state| state.len() >= min_items || state.is_complete());
        }
        entry.wait_for(min_items, max_wait, self.inner.poll).await
    }

    /// Crawls still running, oldest first.
    pub fn active(&self) -> Vec<CrawlSummary> {
        let mut jobs = self.inner.jobs.lock();
        jobs.retain(|_, job| !job.handle.is_finished());
        let mut active: Vec<CrawlSummary> = jobs
            .iter()
            .map(|(key, job)| CrawlSummary {
                key: key.clone(),
                started_at: job.started_at,
                strategies: job.strategies,
            })
            .collect();
        active.sort_by_key(|job| job.started_at);
        active
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.inner
            .jobs
            .lock()
            .get(key)
            .is_some_and(|job| !job.handle.is_finished())
    }

    /// Aborts every running crawl. Their claim guards release the entries.
    pub fn shutdown(&self) {
        let jobs: Vec<RunningCrawl> = self.inner.jobs.lock().drain().map(|(_, job)| job).collect();
        for job in &jobs {
            job.handle.abort();
        }
        if !jobs.is_empty() {
            info!(aborted = jobs.len(), "background crawls aborted");
        }
    }
}

impl FetcherInner {
    /// Drops the bookkeeping for crawl `id`; a newer crawl of the same key
    /// (after eviction) keeps its slot.
    fn forget(&self, key: &str, id: u64) {
        let mut jobs = self.jobs.lock();
        if jobs.get(key).is_some_and(|job| job.id == id) {
            jobs.remove(key);
            debug!(key, "crawl bookkeeping released");
        }
    }
}

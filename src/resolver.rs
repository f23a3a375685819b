#![forbid(unsafe_code)]

//! Channel identifier resolution.
//!
//! Accepts channel ids, `@handle`s, bare handles and channel URLs. Ids are
//! taken as-is; everything else goes through the upstream's URL resolution
//! and, failing that, a channel-only search.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::extract::{resolved_browse_id, search_result_from_item};
use crate::session::SessionManager;
use crate::upstream::{SearchFilters, Upstream};

const CHANNEL_ID_LEN: usize = 24;
const SITE: &str = "https://www.youtube.com";

/// A channel reference before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Id(String),
    Handle(String),
    /// Legacy `/c/<name>`, `/user/<name>` or bare custom URL path.
    Vanity { path: String, name: String },
}

impl ChannelRef {
    fn resolution_url(&self) -> Option<String> {
        match self {
            Self::Id(_) => None,
            Self::Handle(handle) => Some(format!("{SITE}/@{handle}")),
            Self::Vanity { path, .. } => Some(format!("{SITE}/{path}")),
        }
    }

    fn search_text(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Handle(handle) => handle,
            Self::Vanity { name, .. } => name,
        }
    }

    fn memo_key(&self) -> String {
        match self {
            Self::Id(id) => id.clone(),
            Self::Handle(handle) => format!("@{}", handle.to_lowercase()),
            Self::Vanity { path, .. } => path.to_lowercase(),
        }
    }
}

pub fn is_channel_id(value: &str) -> bool {
    value.len() == CHANNEL_ID_LEN
        && value.starts_with("UC")
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

fn valid_handle(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, '/' | '?' | '#' | '&'))
}

fn from_path(path: &str) -> Option<ChannelRef> {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    let first = segments.next()?;
    if let Some(handle) = first.strip_prefix('@') {
        return valid_handle(handle).then(|| ChannelRef::Handle(handle.to_string()));
    }
    match first {
        "channel" => {
            let id = segments.next()?;
            is_channel_id(id).then(|| ChannelRef::Id(id.to_string()))
        }
        "c" | "user" => {
            let name = segments.next()?;
            valid_handle(name).then(|| ChannelRef::Vanity {
                path: format!("{first}/{name}"),
                name: name.to_string(),
            })
        }
        name if valid_handle(name) => Some(ChannelRef::Vanity {
            path: name.to_string(),
            name: name.to_string(),
        }),
        _ => None,
    }
}

/// Classifies user input without touching the network.
pub fn parse_identifier(input: &str) -> Option<ChannelRef> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if is_channel_id(trimmed) {
        return Some(ChannelRef::Id(trimmed.to_string()));
    }
    if let Some(handle) = trimmed.strip_prefix('@') {
        return valid_handle(handle).then(|| ChannelRef::Handle(handle.to_string()));
    }
    if trimmed.contains('/') {
        let without_scheme = trimmed
            .split_once("://")
            .map_or(trimmed, |(_, rest)| rest);
        let path = match without_scheme.split_once('/') {
            Some((host, rest)) if host.contains('.') => rest,
            _ => without_scheme,
        };
        let path = path.split(['?', '#']).next().unwrap_or_default();
        return from_path(path);
    }
    valid_handle(trimmed).then(|| ChannelRef::Handle(trimmed.to_string()))
}

pub struct Resolver {
    memo: RwLock<HashMap<String, (Instant, String)>>,
    ttl: Duration,
    failures: AtomicU32,
    reset_after: u32,
}

impl Resolver {
    pub fn new(ttl: Duration, reset_after: u32) -> Self {
        Self {
            memo: RwLock::new(HashMap::new()),
            ttl,
            failures: AtomicU32::new(0),
            reset_after,
        }
    }

    /// Resolves `identifier` to a canonical `UC…` channel id.
    pub async fn resolve(&self, sessions: &SessionManager, identifier: &str) -> ServiceResult<String> {
        let reference = parse_identifier(identifier)
            .ok_or_else(|| ServiceError::invalid(format!("unrecognized channel identifier {identifier:?}")))?;
        if let ChannelRef::Id(id) = &reference {
            return Ok(id.clone());
        }

        let memo_key = reference.memo_key();
        if let Some(id) = self.remembered(&memo_key) {
            return Ok(id);
        }

        let session = sessions.get().await?;
        match lookup(session.upstream.as_ref(), &reference).await {
            Some(id) => {
                self.failures.store(0, Ordering::Relaxed);
                self.memo
                    .write()
                    .insert(memo_key, (Instant::now(), id.clone()));
                debug!(identifier, channel_id = %id, "channel resolved");
                Ok(id)
            }
            None => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                if self.reset_after > 0 && failures >= self.reset_after {
                    self.failures.store(0, Ordering::Relaxed);
                    warn!(failures, "repeated resolution failures; regenerating session");
                    if let Err(err) = sessions.regenerate(session.generation).await {
                        warn!(error = %err, "session regeneration failed");
                    }
                }
                Err(ServiceError::not_found(format!("channel {identifier}")))
            }
        }
    }

    fn remembered(&self, memo_key: &str) -> Option<String> {
        let memo = self.memo.read();
        let (at, id) = memo.get(memo_key)?;
        (at.elapsed() < self.ttl).then(|| id.clone())
    }

    pub fn forget_all(&self) {
        self.memo.write().clear();
    }
}

/// Direct URL resolution first, then a channel-only search for the name.
async fn lookup(upstream: &dyn Upstream, reference: &ChannelRef) -> Option<String> {
    if let Some(url) = reference.resolution_url() {
        match upstream.resolve_url(&url).await {
            Ok(payload) => {
                if let Some(id) = resolved_browse_id(&payload) {
                    return Some(id);
                }
                debug!(url, "resolution payload carried no channel id");
            }
            Err(err) => debug!(url, error = %err, "direct resolution failed"),
        }
    }

    let text = reference.search_text();
    match upstream.search(text, &SearchFilters::channels_only()).await {
        Ok(page) => page
            .items
            .iter()
            .filter_map(search_result_from_item)
            .find_map(|result| result.channel_id().map(str::to_string)),
        Err(err) => {
            debug!(query = text, error = %err, "channel search fallback failed");
            None
        }
    }
}

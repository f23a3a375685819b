#![forbid(unsafe_code)]

//! Upstream session lifecycle.
//!
//! The session is created lazily on first use and shared by every request.
//! Regeneration is serialized: callers pass the generation they saw fail,
//! and only the first of them actually rebuilds the client.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::UpstreamSettings;
use crate::error::UpstreamError;
use crate::upstream::innertube::{ClientIdentity, InnertubeClient};
use crate::upstream::{Upstream, UpstreamResult};

/// Builds fresh upstream clients.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> UpstreamResult<Arc<dyn Upstream>>;
}

/// Bootstraps [`InnertubeClient`]s from the platform home page.
pub struct InnertubeSessionFactory {
    settings: UpstreamSettings,
}

impl InnertubeSessionFactory {
    pub fn new(settings: UpstreamSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SessionFactory for InnertubeSessionFactory {
    async fn create(&self) -> UpstreamResult<Arc<dyn Upstream>> {
        let settings = self.settings.clone();
        let bootstrapped = tokio::task::spawn_blocking(move || InnertubeClient::bootstrap(&settings))
            .await
            .map_err(|err| UpstreamError::transport(format!("session task failed: {err}")))?;
        let client = match bootstrapped {
            Ok(client) => client,
            Err(err) => {
                // The API answers anonymous clients too; only the visitor
                // identity is lost.
                warn!(error = %err, "session bootstrap failed; using default identity");
                InnertubeClient::new(&self.settings, ClientIdentity::default())
            }
        };
        debug!(
            client_version = %client.identity().client_version,
            has_visitor = client.identity().visitor_data.is_some(),
            "upstream client ready"
        );
        Ok(Arc::new(client))
    }
}

/// One live upstream client and the generation it belongs to.
#[derive(Clone)]
pub struct Session {
    pub generation: u64,
    pub upstream: Arc<dyn Upstream>,
}

pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    current: RwLock<Option<Session>>,
    rebuild: AsyncMutex<()>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            current: RwLock::new(None),
            rebuild: AsyncMutex::new(()),
        }
    }

    /// Current session, created on first use.
    pub async fn get(&self) -> UpstreamResult<Session> {
        if let Some(session) = self.current.read().clone() {
            return Ok(session);
        }
        let _rebuild = self.rebuild.lock().await;
        if let Some(session) = self.current.read().clone() {
            return Ok(session);
        }
        let upstream = self.factory.create().await?;
        let session = Session {
            generation: 1,
            upstream,
        };
        *self.current.write() = Some(session.clone());
        info!(generation = 1, "upstream session created");
        Ok(session)
    }

    /// Replaces the session that failed at `failed_generation`. When another
    /// caller already replaced it, the newer session is returned untouched.
    pub async fn regenerate(&self, failed_generation: u64) -> UpstreamResult<Session> {
        let _rebuild = self.rebuild.lock().await;
        if let Some(session) = self.current.read().clone()
            && session.generation != failed_generation
        {
            return Ok(session);
        }
        let upstream = self.factory.create().await?;
        let generation = failed_generation + 1;
        let session = Session {
            generation,
            upstream,
        };
        *self.current.write() = Some(session.clone());
        info!(generation, "upstream session regenerated");
        Ok(session)
    }

    /// Forces a new session regardless of which one is current.
    pub async fn reset(&self) -> UpstreamResult<Session> {
        let current = self.generation();
        self.regenerate(current).await
    }

    /// Generation of the live session, 0 before the first one exists.
    pub fn generation(&self) -> u64 {
        self.current
            .read()
            .as_ref()
            .map_or(0, |session| session.generation)
    }
}

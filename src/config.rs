#![forbid(unsafe_code)]

//! Runtime settings (`.env` + process env + CLI overrides) and the crawl
//! tunables loaded from an optional TOML file.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::cache::EntityKind;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8090;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_LOG_FILTER: &str = "tubecache=info,backend=info";

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: String,
    pub port: u16,
    pub config_path: Option<PathBuf>,
    pub log_filter: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config_path: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_settings(&file_vars, env_var_string, overrides))
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("TUBECACHE_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("TUBECACHE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let config_path = overrides.config_path.or_else(|| {
        lookup_value("TUBECACHE_CONFIG", file_vars, &env_lookup).map(PathBuf::from)
    });
    let log_filter = lookup_value("TUBECACHE_LOG", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    RuntimeSettings {
        host,
        port,
        config_path,
        log_filter,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses `KEY=value` lines, tolerating `export`, quotes and comments. A
/// missing file is not an error.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Pagination limits for one kind of crawl. The numbers are heuristics tuned
/// against the live service, hence configurable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrawlLimits {
    pub max_pages: usize,
    pub stall_threshold: usize,
    pub rate_limit_every: usize,
    pub inter_page_delay_ms: u64,
    pub ttl_secs: u64,
}

impl CrawlLimits {
    const fn new(
        max_pages: usize,
        stall_threshold: usize,
        rate_limit_every: usize,
        inter_page_delay_ms: u64,
        ttl_secs: u64,
    ) -> Self {
        Self {
            max_pages,
            stall_threshold,
            rate_limit_every,
            inter_page_delay_ms,
            ttl_secs,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn inter_page_delay(&self) -> Duration {
        Duration::from_millis(self.inter_page_delay_ms)
    }

    fn validate(&self, label: &str) -> Result<()> {
        if self.max_pages == 0 {
            bail!("{label}.max_pages must be greater than 0");
        }
        if self.stall_threshold == 0 {
            bail!("{label}.stall_threshold must be greater than 0");
        }
        // A zero TTL makes every unclaimed entry stale on sight.
        if self.ttl_secs == 0 {
            bail!("{label}.ttl_secs must be greater than 0");
        }
        Ok(())
    }
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self::new(100, 5, 10, 300, 15 * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub hl: String,
    pub gl: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.youtube.com".to_string(),
            hl: "en".to_string(),
            gl: "US".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Everything the aggregation layer can be tuned with. Every field has a
/// default so a partial TOML file is enough.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrawlSettings {
    pub channel: CrawlLimits,
    pub search: CrawlLimits,
    pub comments: CrawlLimits,
    pub playlist: CrawlLimits,
    pub related: CrawlLimits,
    pub default_window: usize,
    pub wait_poll_ms: u64,
    pub default_wait_ms: u64,
    pub max_wait_ms: u64,
    pub enrich_concurrency: usize,
    pub resolve_failures_before_reset: u32,
    pub upstream: UpstreamSettings,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            channel: CrawlLimits::new(200, 5, 10, 500, 30 * 60),
            search: CrawlLimits::new(50, 5, 10, 300, 10 * 60),
            comments: CrawlLimits::new(100, 5, 15, 300, 5 * 60),
            playlist: CrawlLimits::new(200, 5, 20, 300, 30 * 60),
            related: CrawlLimits::new(5, 3, 10, 0, 15 * 60),
            default_window: 20,
            wait_poll_ms: 100,
            default_wait_ms: 3_000,
            max_wait_ms: 30_000,
            enrich_concurrency: 4,
            resolve_failures_before_reset: 3,
            upstream: UpstreamSettings::default(),
        }
    }
}

impl CrawlSettings {
    /// Loads the TOML file when given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Reading {}", path.display()))?;
                Self::from_toml(&raw).with_context(|| format!("Parsing {}", path.display()))?
            }
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        for kind in EntityKind::ALL {
            self.limits(kind).validate(kind.as_str())?;
        }
        if self.default_window == 0 {
            bail!("default_window must be greater than 0");
        }
        if self.wait_poll_ms == 0 {
            bail!("wait_poll_ms must be greater than 0");
        }
        if self.enrich_concurrency == 0 {
            bail!("enrich_concurrency must be greater than 0");
        }
        if self.default_wait_ms > self.max_wait_ms {
            bail!(
                "default_wait_ms ({}) exceeds max_wait_ms ({})",
                self.default_wait_ms,
                self.max_wait_ms
            );
        }
        Ok(())
    }

    pub fn limits(&self, kind: EntityKind) -> &CrawlLimits {
        match kind {
            EntityKind::Channel => &self.channel,
            EntityKind::Search => &self.search,
            EntityKind::Comments => &self.comments,
            EntityKind::Playlist => &self.playlist,
            EntityKind::Related => &self.related,
        }
    }

    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    /// Clamps a caller supplied wait to `max_wait_ms`, falling back to
    /// `default_wait_ms`.
    pub fn wait_budget(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_wait_ms)
            .min(self.max_wait_ms);
        Duration::from_millis(ms)
    }
}

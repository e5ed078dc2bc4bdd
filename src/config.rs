//! Environment-sourced configuration.
//!
//! `MirrorConfig::from_env()` is the production entry point; `from_lookup` takes any key lookup
//! so tests can feed a fixed map instead of mutating the process environment.

use crate::error::ConfigError;
use crate::rate_limit::policy::{PolicyTable, RateLimitPolicy, RouteCategory};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://pokeapi.co/api/v2";

/// Freshness windows per record family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Single-entity reads.
    pub entity: Duration,
    /// Range syncs; typically shorter than `entity`.
    pub list: Duration,
    /// Reference catalogs (categories, metrics).
    pub reference: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            entity: Duration::from_secs(24 * 60 * 60),
            list: Duration::from_secs(60 * 60),
            reference: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Per-call bound; `None` leaves the transport default in place.
    pub timeout: Option<Duration>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(), timeout: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Distributed counter backend. Absent means in-process counting.
    pub redis_url: Option<String>,
    pub connect_timeout: Duration,
    pub policies: PolicyTable,
    /// Paths that bypass rate limiting entirely.
    pub exempt_paths: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            connect_timeout: Duration::from_millis(5000),
            policies: PolicyTable::default(),
            exempt_paths: vec!["/health".to_string(), "/health/ready".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    pub upstream: UpstreamConfig,
    pub ttls: CacheTtls,
    /// Upper bound on concurrent upstream fetches issued by one range sync.
    pub backfill_concurrency: usize,
    /// Serve the last stored copy when a refresh fails instead of erroring.
    pub serve_stale_on_error: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            ttls: CacheTtls::default(),
            backfill_concurrency: 8,
            serve_stale_on_error: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("UPSTREAM_BASE_URL") {
            config.upstream.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_opt::<u64>("UPSTREAM_TIMEOUT_SECS", get("UPSTREAM_TIMEOUT_SECS"))? {
            config.upstream.timeout = Some(positive_secs("UPSTREAM_TIMEOUT_SECS", secs)?);
        }

        if let Some(secs) = parse_opt::<u64>("ENTITY_TTL_SECS", get("ENTITY_TTL_SECS"))? {
            config.ttls.entity = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64>("LIST_TTL_SECS", get("LIST_TTL_SECS"))? {
            config.ttls.list = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64>("REFERENCE_TTL_SECS", get("REFERENCE_TTL_SECS"))? {
            config.ttls.reference = Duration::from_secs(secs);
        }

        if let Some(n) = parse_opt::<usize>("BACKFILL_CONCURRENCY", get("BACKFILL_CONCURRENCY"))? {
            if n == 0 {
                return Err(ConfigError::invalid("BACKFILL_CONCURRENCY", "0", "must be at least 1"));
            }
            config.backfill_concurrency = n;
        }
        if let Some(flag) = get("SERVE_STALE_ON_ERROR") {
            config.serve_stale_on_error = parse_bool("SERVE_STALE_ON_ERROR", &flag)?;
        }

        config.rate_limit.redis_url = get("REDIS_URL");
        if let Some(ms) = parse_opt::<u64>("REDIS_CONNECT_TIMEOUT_MS", get("REDIS_CONNECT_TIMEOUT_MS"))? {
            config.rate_limit.connect_timeout = Duration::from_millis(ms);
        }

        let relaxed = get("APP_ENV").map(|env| env.eq_ignore_ascii_case("test")).unwrap_or(false);
        let mut policies = PolicyTable::defaults(relaxed);
        for category in RouteCategory::ALL {
            let base = policies.get(category).clone();
            let upper = category.as_str().to_ascii_uppercase();
            let window_key = format!("RATE_LIMIT_{upper}_WINDOW_SECS");
            let max_key = format!("RATE_LIMIT_{upper}_MAX");

            let window = match parse_opt::<u64>(&window_key, get(window_key.as_str()))? {
                Some(secs) => positive_secs(&window_key, secs)?,
                None => base.window,
            };
            let max_hits = parse_opt::<u64>(&max_key, get(max_key.as_str()))?.unwrap_or(base.max_hits);
            policies.set(category, RateLimitPolicy { window, max_hits, ..base });
        }
        config.rate_limit.policies = policies;

        Ok(config)
    }

    pub fn with_upstream_base_url(mut self, url: impl Into<String>) -> Self {
        self.upstream.base_url = url.into();
        self
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    pub fn with_backfill_concurrency(mut self, n: usize) -> Self {
        self.backfill_concurrency = n.max(1);
        self
    }

    pub fn with_serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.rate_limit.redis_url = Some(url.into());
        self
    }

    pub fn with_policy(mut self, category: RouteCategory, policy: RateLimitPolicy) -> Self {
        self.rate_limit.policies.set(category, policy);
        self
    }
}

fn parse_opt<T>(key: &str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| value.parse::<T>().map_err(|e| ConfigError::invalid(key, &value, e.to_string())))
        .transpose()
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::invalid(key, "0", "must be at least 1 second"));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "expected a boolean")),
    }
}

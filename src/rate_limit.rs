//! Per-route fixed-window rate limiting.
//!
//! - [`policy`]: route categories and their window / limit / key-prefix policies.
//! - [`store`]: the shared [`CounterStore`] (in-process or Redis, fail-open).
//! - [`RateLimitEnforcer`]: one counter increment per request, producing a [`Decision`] that
//!   always carries [`RateLimitHeaders`] and, when the limit is exceeded, a
//!   [`RateLimitExceeded`] body.
//! - [`middleware`]: tower layer applying the enforcer to `http` requests.
//!
//! Per `(policy, client)` counter: no hits, then counting while `hits <= limit`, then limited
//! once `hits > limit`. Only window expiry or an explicit [`RateLimitEnforcer::reset`] returns a
//! client to no hits.

use crate::clock::Clock;
use crate::error::CounterError;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub mod middleware;
pub mod policy;
#[cfg(feature = "distributed")]
mod redis_store;
pub mod store;

pub use middleware::{RateLimitLayer, RateLimitService};
pub use policy::{PolicyTable, RateLimitPolicy, RouteCategory};
pub use store::{connect_counter_store, CounterStore, FailOpen, Hit, MemoryCounterStore};
#[cfg(feature = "distributed")]
pub use store::RedisCounterStore;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");
pub const RATE_LIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");

/// Standard rate-limit response headers for one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Whole seconds until the window resets, rounded up.
    pub reset_secs: u64,
    /// `"<limit>;w=<window secs>"`.
    pub policy: String,
}

impl RateLimitHeaders {
    /// Write the headers into `headers`, replacing existing values.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from(self.reset_secs));
        if let Ok(policy) = HeaderValue::from_str(&self.policy) {
            headers.insert(RATE_LIMIT_POLICY, policy);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitDetails {
    pub limit: u64,
    pub remaining: u64,
    pub reset_time: DateTime<Utc>,
    /// Human readable wait, e.g. "1 hour".
    pub retry_after: String,
    pub requests_allowed: String,
}

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceeded {
    pub error: String,
    pub message: String,
    pub details: LimitDetails,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
}

impl RateLimitExceeded {
    pub const STATUS: u16 = 429;

    fn new(policy: &RateLimitPolicy, reset_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            error: "Rate limit exceeded".to_string(),
            message: format!(
                "Too many {} requests from this IP address. Please try again later.",
                policy.subject
            ),
            details: LimitDetails {
                limit: policy.max_hits,
                remaining: 0,
                reset_time,
                retry_after: policy.window_label(),
                requests_allowed: policy.requests_allowed(),
            },
            status_code: Self::STATUS,
            timestamp: now,
        }
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted { headers: RateLimitHeaders },
    Limited { headers: RateLimitHeaders, body: RateLimitExceeded },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    pub fn headers(&self) -> &RateLimitHeaders {
        match self {
            Decision::Admitted { headers } | Decision::Limited { headers, .. } => headers,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.headers().remaining
    }
}

/// Drives the shared counter store against a live-swappable [`PolicyTable`].
///
/// Constructed once at startup and cloned into every route layer.
#[derive(Clone)]
pub struct RateLimitEnforcer {
    store: Arc<dyn CounterStore>,
    policies: Arc<ArcSwap<PolicyTable>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimitEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitEnforcer")
            .field("backend", &self.store.backend())
            .field("policies", &self.policies.load_full())
            .finish()
    }
}

impl RateLimitEnforcer {
    pub fn new(store: Arc<dyn CounterStore>, policies: PolicyTable, clock: Arc<dyn Clock>) -> Self {
        Self { store, policies: Arc::new(ArcSwap::from_pointee(policies)), clock }
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Current policy table snapshot.
    pub fn policies(&self) -> Arc<PolicyTable> {
        self.policies.load_full()
    }

    pub fn policy(&self, category: RouteCategory) -> RateLimitPolicy {
        self.policies.load().get(category).clone()
    }

    /// Swap in a new policy table. Counters already opened keep their original expiry.
    pub fn replace_policies(&self, table: PolicyTable) {
        self.policies.store(Arc::new(table));
    }

    /// Count one request from `client` against `category` and decide whether to admit it.
    pub async fn check(&self, category: RouteCategory, client: &str) -> Decision {
        let policy = self.policy(category);
        let key = policy.counter_key(client);
        let hit = match self.store.increment(&key, policy.window).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(
                    target: "catalog_mirror::rate_limit",
                    backend = self.store.backend(),
                    %key,
                    error = %err,
                    "counter increment failed; admitting as first hit"
                );
                Hit::first(policy.window)
            }
        };

        let now = self.clock.now();
        let ttl = hit.ttl_remaining.unwrap_or(policy.window);
        let headers = RateLimitHeaders {
            limit: policy.max_hits,
            remaining: policy.max_hits.saturating_sub(hit.total_hits),
            reset_secs: ceil_secs(ttl),
            policy: policy.header_value(),
        };

        if hit.total_hits <= policy.max_hits {
            return Decision::Admitted { headers };
        }

        let reset_time = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        warn!(
            target: "catalog_mirror::rate_limit",
            client,
            category = %category,
            limit = policy.max_hits,
            hits = hit.total_hits,
            reset_time = %reset_time,
            "rate limit exceeded"
        );
        Decision::Limited { headers, body: RateLimitExceeded::new(&policy, reset_time, now) }
    }

    /// Administrative reset of one client's counter for `category`.
    pub async fn reset(&self, category: RouteCategory, client: &str) -> Result<(), CounterError> {
        let key = self.policy(category).counter_key(client);
        self.store.reset(&key).await
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

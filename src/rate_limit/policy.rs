//! Per-route rate-limit policies.
//!
//! Each [`RouteCategory`] maps to one fixed-window [`RateLimitPolicy`]. Counters of different
//! categories share one counter store and are kept apart only by the policy's key prefix.

use std::fmt;
use std::time::Duration;

/// Route families that carry distinct policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteCategory {
    /// All API traffic.
    General,
    /// Full-text search.
    Search,
    /// Type-ahead suggestions.
    Suggestions,
    /// Bulk seeding of the local mirror.
    Seed,
}

impl RouteCategory {
    pub const ALL: [RouteCategory; 4] = [Self::General, Self::Search, Self::Suggestions, Self::Seed];

    /// Stable name used in config keys and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Search => "search",
            Self::Suggestions => "suggestions",
            Self::Seed => "seed",
        }
    }
}

impl fmt::Display for RouteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-window limit for one route category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_hits: u64,
    /// Namespace of this policy's counters in the shared store.
    pub key_prefix: String,
    /// Noun used in the rejection message ("Too many {subject} requests ...").
    pub subject: String,
}

impl RateLimitPolicy {
    pub fn new(
        window: Duration,
        max_hits: u64,
        key_prefix: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self { window, max_hits, key_prefix: key_prefix.into(), subject: subject.into() }
    }

    /// Built-in policy for a category. `relaxed` raises the general limit for test deployments.
    pub fn default_for(category: RouteCategory, relaxed: bool) -> Self {
        const MINUTE: u64 = 60;
        match category {
            RouteCategory::General => Self::new(
                Duration::from_secs(10 * MINUTE),
                if relaxed { 1000 } else { 300 },
                "general:",
                "general API",
            ),
            RouteCategory::Search => {
                Self::new(Duration::from_secs(5 * MINUTE), 30, "search:", "search")
            }
            RouteCategory::Suggestions => {
                Self::new(Duration::from_secs(5 * MINUTE), 60, "suggestions:", "suggestion")
            }
            RouteCategory::Seed => Self::new(Duration::from_secs(60 * MINUTE), 3, "seed:", "seed"),
        }
    }

    /// Counter key for one client under this policy.
    pub fn counter_key(&self, client: &str) -> String {
        format!("{}{}", self.key_prefix, client)
    }

    /// Human readable window, e.g. "10 minutes" or "1 hour".
    pub fn window_label(&self) -> String {
        humanize_window(self.window)
    }

    /// Value of the `RateLimit-Policy` header: `"<limit>;w=<window seconds>"`.
    pub fn header_value(&self) -> String {
        format!("{};w={}", self.max_hits, self.window.as_secs())
    }

    pub fn requests_allowed(&self) -> String {
        format!("{} requests per {}", self.max_hits, self.window_label())
    }
}

fn humanize_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (amount, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if amount == 1 {
        format!("1 {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}

/// Policies for every route category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    general: RateLimitPolicy,
    search: RateLimitPolicy,
    suggestions: RateLimitPolicy,
    seed: RateLimitPolicy,
}

impl PolicyTable {
    /// Built-in table; `relaxed` applies the test-deployment general limit.
    pub fn defaults(relaxed: bool) -> Self {
        Self {
            general: RateLimitPolicy::default_for(RouteCategory::General, relaxed),
            search: RateLimitPolicy::default_for(RouteCategory::Search, relaxed),
            suggestions: RateLimitPolicy::default_for(RouteCategory::Suggestions, relaxed),
            seed: RateLimitPolicy::default_for(RouteCategory::Seed, relaxed),
        }
    }

    pub fn get(&self, category: RouteCategory) -> &RateLimitPolicy {
        match category {
            RouteCategory::General => &self.general,
            RouteCategory::Search => &self.search,
            RouteCategory::Suggestions => &self.suggestions,
            RouteCategory::Seed => &self.seed,
        }
    }

    pub fn set(&mut self, category: RouteCategory, policy: RateLimitPolicy) {
        let slot = match category {
            RouteCategory::General => &mut self.general,
            RouteCategory::Search => &mut self.search,
            RouteCategory::Suggestions => &mut self.suggestions,
            RouteCategory::Seed => &mut self.seed,
        };
        *slot = policy;
    }

    /// Replace one category's policy, builder style.
    pub fn with(mut self, category: RouteCategory, policy: RateLimitPolicy) -> Self {
        self.set(category, policy);
        self
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::defaults(false)
    }
}

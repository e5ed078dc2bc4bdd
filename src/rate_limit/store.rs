//! Counter storage for fixed-window rate limiting.
//!
//! A window's expiry is fixed by the hit that creates it; later hits increment the count without
//! extending it. Backends:
//! - [`MemoryCounterStore`]: in-process. Exact within one process, not shared across instances.
//! - [`RedisCounterStore`]: distributed, one atomic script per hit (feature `distributed`).
//!
//! [`FailOpen`] wraps a backend whose failures must not block traffic: any error is logged and
//! the hit is reported as the first one of a fresh window.

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::error::CounterError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "distributed")]
pub use super::redis_store::RedisCounterStore;

/// Counter state after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Hits counted in the current window, including this one.
    pub total_hits: u64,
    /// Time until the window resets, when the backend knows it.
    pub ttl_remaining: Option<Duration>,
}

impl Hit {
    /// First hit of a new window.
    pub fn first(window: Duration) -> Self {
        Self { total_hits: 1, ttl_remaining: Some(window) }
    }
}

/// Atomic increment-with-expiry primitive shared by every rate-limit policy.
///
/// Policies keep their counters apart through key prefixes only.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Count one hit against `key`, opening a window of length `window` if none is active.
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit, CounterError>;

    /// Drop the counter for `key` (administrative reset).
    async fn reset(&self, key: &str) -> Result<(), CounterError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// How often expired windows are swept, both on increment and by the janitor.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    hits: u64,
    expires_at_millis: u64,
}

#[derive(Debug, Default)]
struct Windows {
    by_key: HashMap<String, Window>,
    next_sweep_millis: u64,
}

impl Windows {
    fn purge(&mut self, now: u64) -> usize {
        let before = self.by_key.len();
        self.by_key.retain(|_, w| w.expires_at_millis > now);
        before - self.by_key.len()
    }
}

/// In-process counter store.
///
/// Counters are exact for callers inside this process; separate server instances each keep their
/// own counts. Clones share state. Expired windows are swept at most once per
/// [`SWEEP_INTERVAL`] by the next increment, so distinct clients never accumulate.
#[derive(Debug, Clone)]
pub struct MemoryCounterStore {
    windows: Arc<Mutex<Windows>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { windows: Arc::new(Mutex::new(Windows::default())), clock }
    }

    fn windows(&self) -> MutexGuard<'_, Windows> {
        lock_windows(&self.windows)
    }

    /// Active (unexpired) counters.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.windows().by_key.values().filter(|w| w.expires_at_millis > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict expired windows; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.windows().purge(now)
    }

    /// Periodically purge expired windows on the current tokio runtime, even when no hits arrive.
    ///
    /// The task ends once every clone of the store has been dropped.
    pub fn spawn_janitor(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let windows = Arc::downgrade(&self.windows);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(windows) = windows.upgrade() else {
                    break;
                };
                let purged = lock_windows(&windows).purge(clock.now_millis());
                if purged > 0 {
                    debug!(target: "catalog_mirror::rate_limit", purged, "expired counters purged");
                }
            }
        })
    }
}

fn lock_windows(windows: &Mutex<Windows>) -> MutexGuard<'_, Windows> {
    windows.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit, CounterError> {
        let now = self.clock.now_millis();
        let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let mut windows = self.windows();
        if now >= windows.next_sweep_millis {
            let purged = windows.purge(now);
            windows.next_sweep_millis = now.saturating_add(SWEEP_INTERVAL.as_millis() as u64);
            if purged > 0 {
                debug!(target: "catalog_mirror::rate_limit", purged, "expired counters swept");
            }
        }
        let entry = windows
            .by_key
            .entry(key.to_string())
            .or_insert(Window { hits: 0, expires_at_millis: 0 });
        if entry.expires_at_millis <= now {
            *entry = Window { hits: 0, expires_at_millis: now.saturating_add(window_millis) };
        }
        entry.hits = entry.hits.saturating_add(1);
        Ok(Hit {
            total_hits: entry.hits,
            ttl_remaining: Some(Duration::from_millis(entry.expires_at_millis - now)),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), CounterError> {
        self.windows().by_key.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Availability-first wrapper: backend errors are logged and treated as a first hit.
#[derive(Debug, Clone)]
pub struct FailOpen<S> {
    inner: S,
}

impl<S> FailOpen<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S> CounterStore for FailOpen<S>
where
    S: CounterStore,
{
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit, CounterError> {
        match self.inner.increment(key, window).await {
            Ok(hit) => Ok(hit),
            Err(err) => {
                warn!(
                    target: "catalog_mirror::rate_limit",
                    backend = self.inner.backend(),
                    key,
                    error = %err,
                    "counter increment failed; admitting as first hit"
                );
                Ok(Hit::first(window))
            }
        }
    }

    async fn reset(&self, key: &str) -> Result<(), CounterError> {
        if let Err(err) = self.inner.reset(key).await {
            warn!(target: "catalog_mirror::rate_limit", backend = self.inner.backend(), key, error = %err, "counter reset failed");
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        self.inner.backend()
    }
}

/// Build the process-wide counter store once at startup.
///
/// Without a configured distributed backend, or when it cannot be reached, counting falls back to
/// the in-process store with a janitor running every [`SWEEP_INTERVAL`]. A reachable distributed
/// backend is wrapped in [`FailOpen`].
pub async fn connect_counter_store(
    config: &RateLimitConfig,
    clock: Arc<dyn Clock>,
) -> Arc<dyn CounterStore> {
    let Some(url) = config.redis_url.as_deref() else {
        info!(target: "catalog_mirror::rate_limit", "no distributed counter backend configured; counting in process");
        return in_process(clock);
    };

    #[cfg(feature = "distributed")]
    {
        match RedisCounterStore::connect(url, config.connect_timeout).await {
            Ok(store) => {
                info!(target: "catalog_mirror::rate_limit", "connected to distributed counter backend");
                Arc::new(FailOpen::new(store))
            }
            Err(err) => {
                warn!(
                    target: "catalog_mirror::rate_limit",
                    error = %err,
                    "distributed counter backend unreachable; counting in process"
                );
                in_process(clock)
            }
        }
    }

    #[cfg(not(feature = "distributed"))]
    {
        warn!(
            target: "catalog_mirror::rate_limit",
            url,
            "built without the `distributed` feature; counting in process"
        );
        in_process(clock)
    }
}

fn in_process(clock: Arc<dyn Clock>) -> Arc<dyn CounterStore> {
    let store = MemoryCounterStore::new(clock);
    // Detached; exits when the store is dropped.
    drop(store.spawn_janitor(SWEEP_INTERVAL));
    Arc::new(store)
}

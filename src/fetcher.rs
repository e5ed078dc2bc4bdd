//! Freshness-aware, cache-aside entity fetcher.
//!
//! `fetch(id, force)`:
//! 1. Read the stored snapshot.
//! 2. If present, not forced, and younger than the entity TTL: return it (no upstream call).
//! 3. Otherwise fetch upstream, commit scalar row + references + relation set in one store
//!    write stamped with the fetch time, and return the re-read canonical snapshot.
//!
//! Concurrent refreshes of the same id are coalesced: the first caller starts the upstream call
//! and registers it; later callers await the same shared result instead of issuing another call.
//!
//! Upstream failures surface as [`SyncError::UpstreamUnavailable`]. A stored copy is only served in
//! their place when `serve_stale_on_error` is enabled. Nothing is retried here.

use crate::clock::{age_of, Clock};
use crate::config::MirrorConfig;
use crate::error::{StoreError, SyncError, UpstreamError};
use crate::model::{EntityId, EntitySnapshot};
use crate::store::CatalogStore;
use crate::upstream::UpstreamSource;
use crate::validation::validate_entity_id;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

type RefreshResult = Result<EntitySnapshot, SyncError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// True when `last_fetched` is set and younger than `ttl` at `now`.
pub fn is_fresh(last_fetched: Option<DateTime<Utc>>, ttl: Duration, now: DateTime<Utc>) -> bool {
    last_fetched.map(|stamp| age_of(stamp, now) < ttl).unwrap_or(false)
}

struct InFlight {
    flight: u64,
    result: SharedRefresh,
}

struct FetcherInner {
    upstream: Arc<dyn UpstreamSource>,
    store: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    in_flight: Mutex<HashMap<EntityId, InFlight>>,
    next_flight: AtomicU64,
}

/// Cheap to clone; clones share the in-flight registry.
#[derive(Clone)]
pub struct EntityFetcher {
    inner: Arc<FetcherInner>,
    serve_stale_on_error: bool,
}

impl std::fmt::Debug for EntityFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityFetcher")
            .field("ttl", &self.inner.ttl)
            .field("serve_stale_on_error", &self.serve_stale_on_error)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl EntityFetcher {
    pub fn new(
        upstream: Arc<dyn UpstreamSource>,
        store: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                upstream,
                store,
                clock,
                ttl,
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
            }),
            serve_stale_on_error: false,
        }
    }

    /// Build from configuration: entity TTL and stale-fallback setting.
    pub fn from_config(
        config: &MirrorConfig,
        upstream: Arc<dyn UpstreamSource>,
        store: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(upstream, store, clock, config.ttls.entity)
            .with_serve_stale_on_error(config.serve_stale_on_error)
    }

    /// Serve the last stored copy when an upstream refresh fails.
    pub fn with_serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.inner.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Number of ids with an upstream refresh currently registered.
    pub fn in_flight(&self) -> usize {
        self.registry().len()
    }

    /// Return a populated entity no older than the TTL, refreshing from upstream when needed.
    /// `force` always refreshes.
    pub async fn fetch(&self, id: EntityId, force: bool) -> Result<EntitySnapshot, SyncError> {
        validate_entity_id(i64::from(id))?;

        let existing = self.inner.store.get(id).await?;
        if let Some(snapshot) = &existing {
            if !force && is_fresh(snapshot.last_fetched(), self.inner.ttl, self.inner.clock.now()) {
                debug!(target: "catalog_mirror::fetcher", id, "cache hit");
                return Ok(snapshot.clone());
            }
        }

        match self.refresh_coalesced(id, force).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) if err.is_upstream() && self.serve_stale_on_error => match existing {
                Some(stale) => {
                    warn!(
                        target: "catalog_mirror::fetcher",
                        id,
                        error = %err,
                        last_fetched = ?stale.last_fetched(),
                        "upstream refresh failed; serving stored copy"
                    );
                    Ok(stale)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<EntityId, InFlight>> {
        self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A forced caller never joins a flight that has already finished but is still registered.
    async fn refresh_coalesced(&self, id: EntityId, force: bool) -> RefreshResult {
        let (flight, result) = {
            let mut registry = self.registry();
            let pending = registry
                .get(&id)
                .filter(|p| !(force && p.result.peek().is_some()))
                .map(|p| (p.flight, p.result.clone()));
            match pending {
                Some(joined) => {
                    debug!(target: "catalog_mirror::fetcher", id, "joining in-flight refresh");
                    joined
                }
                None => {
                    let flight = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let result = refresh(self.inner.clone(), id).boxed().shared();
                    registry.insert(id, InFlight { flight, result: result.clone() });
                    (flight, result)
                }
            }
        };

        let outcome = result.await;

        let mut registry = self.registry();
        if registry.get(&id).map(|pending| pending.flight) == Some(flight) {
            registry.remove(&id);
        }
        outcome
    }
}

async fn refresh(inner: Arc<FetcherInner>, id: EntityId) -> RefreshResult {
    let payload = inner.upstream.fetch_entity(id).await.map_err(|e| {
        warn!(target: "catalog_mirror::fetcher", id, error = %e, "upstream fetch failed");
        SyncError::upstream(id, e)
    })?;
    if payload.id != id {
        return Err(SyncError::upstream(
            id,
            UpstreamError::Decode(format!("requested entity {id}, upstream returned {}", payload.id)),
        ));
    }

    let fetched_at = inner.clock.now();
    let commit = payload.into_commit(fetched_at).map_err(|e| SyncError::upstream(id, e))?;
    let relations = commit.relations.len();
    let generation = inner.store.commit_refresh(commit).await?;
    info!(target: "catalog_mirror::fetcher", id, generation, relations, "entity refreshed");

    inner.store.get(id).await?.ok_or_else(|| {
        SyncError::Store(StoreError::Unavailable(format!("entity {id} missing after commit")))
    })
}

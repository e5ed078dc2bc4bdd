//! Batch backfill of a contiguous id range.
//!
//! A sync of `[offset + 1, offset + limit]` loads what the store already holds, classifies every id
//! as fresh, stale or missing against the list TTL, and force-refreshes the stale and missing ones
//! through the [`EntityFetcher`] under a bounded [`Bulkhead`]. A failed id is logged and left out;
//! the batch still succeeds. The result is re-read from the store, so it is ordered by id, holds
//! only fully populated entities, and may have gaps.

use crate::bulkhead::Bulkhead;
use crate::config::MirrorConfig;
use crate::error::SyncError;
use crate::fetcher::{is_fresh, EntityFetcher};
use crate::model::{EntityId, EntitySnapshot};
use crate::validation::IdRange;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

/// How the stored copies of a range compare to the list TTL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub fresh: Vec<EntityId>,
    pub stale: Vec<EntityId>,
    pub missing: Vec<EntityId>,
}

impl Classification {
    /// Ids that need an upstream refresh, missing first.
    pub fn to_refresh(&self) -> Vec<EntityId> {
        self.missing.iter().chain(self.stale.iter()).copied().collect()
    }
}

/// Split `range` into fresh / stale / missing given what the store returned for it.
pub fn classify(
    range: IdRange,
    stored: &[EntitySnapshot],
    ttl: Duration,
    now: DateTime<Utc>,
) -> Classification {
    let mut out = Classification::default();
    let mut present = HashSet::with_capacity(stored.len());
    for snapshot in stored.iter().filter(|s| range.contains(s.id())) {
        present.insert(snapshot.id());
        if is_fresh(snapshot.last_fetched(), ttl, now) {
            out.fresh.push(snapshot.id());
        } else {
            out.stale.push(snapshot.id());
        }
    }
    out.missing = range.ids().filter(|id| !present.contains(id)).collect();
    out
}

/// Counts for one sync, logged and handed back to callers that want them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeReport {
    pub fresh: usize,
    pub stale: usize,
    pub missing: usize,
    pub refreshed: usize,
    /// Ids whose backfill failed; absent from the returned entities unless a previous copy was
    /// already stored.
    pub failed: Vec<EntityId>,
}

#[derive(Debug, Clone)]
pub struct RangeOutcome {
    pub entities: Vec<EntitySnapshot>,
    pub report: RangeReport,
}

#[derive(Debug, Clone)]
pub struct RangeSynchronizer {
    fetcher: EntityFetcher,
    list_ttl: Duration,
    pool: Bulkhead,
}

impl RangeSynchronizer {
    pub fn new(fetcher: EntityFetcher, list_ttl: Duration, max_concurrent: usize) -> Self {
        Self { fetcher, list_ttl, pool: Bulkhead::new(max_concurrent) }
    }

    pub fn from_config(config: &MirrorConfig, fetcher: EntityFetcher) -> Self {
        Self::new(fetcher, config.ttls.list, config.backfill_concurrency)
    }

    pub fn list_ttl(&self) -> Duration {
        self.list_ttl
    }

    pub fn max_concurrent(&self) -> usize {
        self.pool.max_concurrent()
    }

    /// Entities of `[offset + 1, offset + limit]`, backfilling stale and missing ids first.
    pub async fn sync_range(&self, offset: u32, limit: u32) -> Result<Vec<EntitySnapshot>, SyncError> {
        let range = IdRange::new(offset, limit)?;
        Ok(self.sync(range).await?.entities)
    }

    pub async fn sync(&self, range: IdRange) -> Result<RangeOutcome, SyncError> {
        let store = self.fetcher.store();
        let stored = store.range(range.first(), range.last()).await?;
        let classes = classify(range, &stored, self.list_ttl, self.fetcher.clock().now());

        let mut report = RangeReport {
            fresh: classes.fresh.len(),
            stale: classes.stale.len(),
            missing: classes.missing.len(),
            ..RangeReport::default()
        };

        let to_refresh = classes.to_refresh();
        if to_refresh.is_empty() {
            return Ok(RangeOutcome { entities: stored, report });
        }

        info!(
            target: "catalog_mirror::range_sync",
            first = range.first(),
            last = range.last(),
            missing = report.missing,
            stale = report.stale,
            "backfilling range"
        );

        let fetches = to_refresh.iter().map(|&id| {
            let fetcher = self.fetcher.clone();
            async move { (id, fetcher.fetch(id, true).await) }
        });
        for (id, result) in self.pool.run_all(fetches).await {
            match result {
                Ok(_) => report.refreshed += 1,
                Err(err) => {
                    warn!(target: "catalog_mirror::range_sync", id, error = %err, "backfill failed; skipping");
                    report.failed.push(id);
                }
            }
        }

        let entities = store.range(range.first(), range.last()).await?;
        Ok(RangeOutcome { entities, report })
    }
}

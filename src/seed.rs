//! Bulk population of an empty mirror.
//!
//! Reference catalogs are seeded first so that readiness can be reported, then the initial entity
//! range is walked one id at a time through the [`EntityFetcher`], pausing after every tenth
//! entity to stay polite to the upstream source.

use crate::clock::Clock;
use crate::config::MirrorConfig;
use crate::error::{SyncError, ValidationError};
use crate::fetcher::{is_fresh, EntityFetcher};
use crate::model::{EntityId, ReferenceEntity, ReferenceKind};
use crate::sleeper::Sleeper;
use crate::store::CatalogStore;
use crate::upstream::UpstreamSource;
use crate::validation::MAX_RANGE_LIMIT;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest entity count one seed run accepts.
pub const MAX_SEED_COUNT: u32 = MAX_RANGE_LIMIT;
/// Entities fetched between pauses.
pub const SEED_BATCH: u32 = 10;
pub const SEED_PAUSE: Duration = Duration::from_secs(1);

/// Result of [`Seeder::seed_initial`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub requested: u32,
    pub seeded: u32,
    /// Ids whose fetch failed; the run continued past them.
    pub failed: Vec<EntityId>,
}

pub struct Seeder {
    fetcher: EntityFetcher,
    upstream: Arc<dyn UpstreamSource>,
    sleeper: Arc<dyn Sleeper>,
    reference_ttl: Duration,
}

impl std::fmt::Debug for Seeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seeder")
            .field("fetcher", &self.fetcher)
            .field("sleeper", &self.sleeper)
            .field("reference_ttl", &self.reference_ttl)
            .finish()
    }
}

impl Seeder {
    pub fn new(
        fetcher: EntityFetcher,
        upstream: Arc<dyn UpstreamSource>,
        sleeper: Arc<dyn Sleeper>,
        reference_ttl: Duration,
    ) -> Self {
        Self { fetcher, upstream, sleeper, reference_ttl }
    }

    pub fn from_config(
        config: &MirrorConfig,
        fetcher: EntityFetcher,
        upstream: Arc<dyn UpstreamSource>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self::new(fetcher, upstream, sleeper, config.ttls.reference)
    }

    fn store(&self) -> &Arc<dyn CatalogStore> {
        self.fetcher.store()
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.fetcher.clock()
    }

    /// List the upstream catalog of `kind` and store every reference with full detail.
    ///
    /// References with a detailed stored copy younger than the reference TTL are left alone. Rows
    /// discovered only through entity payloads carry a name and no detail, so they are fetched.
    /// Each reference is written as soon as it is fetched. Returns how many were written. Any
    /// upstream failure aborts the rest of the catalog; references written before it stay.
    pub async fn seed_references(&self, kind: ReferenceKind) -> Result<usize, SyncError> {
        let catalog_error = |source| SyncError::CatalogUnavailable { kind, source };
        let listed = self.upstream.list_references(kind).await.map_err(catalog_error)?;

        let mut written = 0;
        for resource in &listed {
            let id = resource.id().map_err(catalog_error)?;
            if let Some(stored) = self.store().reference(kind, id).await? {
                let now = self.clock().now();
                if has_details(&stored) && is_fresh(stored.last_fetched, self.reference_ttl, now) {
                    debug!(target: "catalog_mirror::seed", %kind, id, "reference fresh; skipping");
                    continue;
                }
            }
            let payload = self.upstream.fetch_reference(kind, id).await.map_err(catalog_error)?;
            let reference = payload.into_reference(kind, self.clock().now());
            self.store().upsert_references(vec![reference]).await?;
            written += 1;
        }

        info!(target: "catalog_mirror::seed", %kind, listed = listed.len(), written, "reference catalog seeded");
        Ok(written)
    }

    /// Seed the category and metric catalogs, then entities `1..=count`.
    pub async fn seed_initial(&self, count: u32) -> Result<SeedReport, SyncError> {
        if count > MAX_SEED_COUNT {
            return Err(ValidationError::SeedCountTooLarge { requested: count, max: MAX_SEED_COUNT }
                .into());
        }

        info!(target: "catalog_mirror::seed", count, "seeding started");
        self.seed_references(ReferenceKind::Category).await?;
        self.seed_references(ReferenceKind::Metric).await?;

        let mut report = SeedReport { requested: count, ..SeedReport::default() };
        for id in 1..=count {
            match self.fetcher.fetch(id, false).await {
                Ok(_) => {
                    report.seeded += 1;
                    debug!(target: "catalog_mirror::seed", id, "entity seeded");
                }
                Err(err) => {
                    warn!(target: "catalog_mirror::seed", id, error = %err, "entity seed failed");
                    report.failed.push(id);
                }
            }
            if id % SEED_BATCH == 0 {
                self.sleeper.sleep(SEED_PAUSE).await;
            }
        }

        info!(
            target: "catalog_mirror::seed",
            requested = report.requested,
            seeded = report.seeded,
            failed = report.failed.len(),
            "seeding finished"
        );
        Ok(report)
    }
}

fn has_details(reference: &ReferenceEntity) -> bool {
    reference.generation.is_some() || reference.game_index.is_some() || reference.battle_only.is_some()
}

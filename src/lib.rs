#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # catalog-mirror
//!
//! Keeps a local mirror of a third-party record catalog fresh and protects the routes that
//! expose it with distributed fixed-window rate limiting.
//!
//! ## Components
//!
//! - [`EntityFetcher`]: cache-aside single-entity reads with a TTL, atomic relation swaps and
//!   single-flight de-duplication of concurrent refreshes.
//! - [`RangeSynchronizer`]: classifies an id range as fresh / stale / missing and backfills the
//!   gaps through a bounded [`Bulkhead`]; per-id failures are logged and skipped.
//! - [`Seeder`] and [`HealthProbe`]: bulk population and liveness / readiness reports.
//! - [`rate_limit`]: [`CounterStore`] backends (in-process, Redis with fail-open),
//!   [`RateLimitEnforcer`] and a tower [`RateLimitLayer`] emitting `RateLimit-*` headers and
//!   structured 429 bodies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use catalog_mirror::{
//!     CatalogStore, EntityFetcher, MemoryCatalogStore, MirrorConfig, RangeSynchronizer,
//!     SystemClock, UpstreamSource,
//! };
//! use std::sync::Arc;
//!
//! async fn serve(upstream: Arc<dyn UpstreamSource>) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MirrorConfig::from_env()?;
//!     let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
//!     let fetcher = EntityFetcher::from_config(&config, upstream, store, Arc::new(SystemClock));
//!
//!     let bulbasaur = fetcher.fetch(1, false).await?;
//!     println!("{} (generation {})", bulbasaur.entity.name, bulbasaur.generation);
//!
//!     let ranges = RangeSynchronizer::from_config(&config, fetcher);
//!     let first_page = ranges.sync_range(0, 20).await?;
//!     println!("{} entities", first_page.len());
//!     Ok(())
//! }
//! ```

pub mod bulkhead;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod model;
pub mod range_sync;
pub mod rate_limit;
pub mod seed;
pub mod sleeper;
pub mod store;
pub mod timeout;
pub mod upstream;
pub mod validation;

// Re-exports
pub use bulkhead::Bulkhead;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheTtls, MirrorConfig, RateLimitConfig, UpstreamConfig};
pub use error::{ConfigError, CounterError, StoreError, SyncError, UpstreamError, ValidationError};
pub use fetcher::EntityFetcher;
pub use health::{HealthProbe, HealthReport};
pub use model::{
    CatalogEntity, EntityId, EntitySnapshot, ReferenceEntity, ReferenceKind, RelationRecord,
    ResolvedRelation, Sprites,
};
pub use range_sync::{RangeOutcome, RangeReport, RangeSynchronizer};
pub use rate_limit::{
    connect_counter_store, CounterStore, Decision, FailOpen, Hit, MemoryCounterStore,
    PolicyTable, RateLimitEnforcer, RateLimitExceeded, RateLimitHeaders, RateLimitLayer,
    RateLimitPolicy, RateLimitService, RouteCategory,
};
#[cfg(feature = "distributed")]
pub use rate_limit::RedisCounterStore;
pub use seed::{SeedReport, Seeder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{CatalogStore, MemoryCatalogStore};
pub use timeout::{TimedOut, TimeoutPolicy};
#[cfg(feature = "http-upstream")]
pub use upstream::HttpUpstream;
pub use upstream::UpstreamSource;
pub use validation::IdRange;

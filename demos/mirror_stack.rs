//! End-to-end wiring of the mirror against the live upstream catalog.
//!
//! ```text
//! RUST_LOG=catalog_mirror=debug cargo run --example mirror_stack
//! REDIS_URL=redis://127.0.0.1:6379 cargo run --example mirror_stack
//! ```

use catalog_mirror::rate_limit::{
    connect_counter_store, CounterStore, RateLimitEnforcer, RateLimitLayer, RouteCategory,
};
use catalog_mirror::{
    CatalogStore, EntityFetcher, HealthProbe, HttpUpstream, MemoryCatalogStore, MirrorConfig,
    RangeSynchronizer, Seeder, SystemClock, TokioSleeper, UpstreamSource,
};
use http::{Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tower::{service_fn, Layer, ServiceExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("catalog_mirror=info")),
        )
        .init();

    let config = MirrorConfig::from_env()?;
    let clock = Arc::new(SystemClock);
    let upstream: Arc<dyn UpstreamSource> = Arc::new(HttpUpstream::new(&config.upstream)?);
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());

    let fetcher = EntityFetcher::from_config(&config, upstream.clone(), store.clone(), clock.clone());
    let probe = HealthProbe::new(store.clone(), clock.clone());
    println!("readiness before seeding: {}", serde_json::to_string(&probe.readiness().await)?);

    let seeder = Seeder::from_config(&config, fetcher.clone(), upstream, Arc::new(TokioSleeper));
    let report = seeder.seed_initial(12).await?;
    println!("seeded {} of {} (failed: {:?})", report.seeded, report.requested, report.failed);
    println!("readiness after seeding: {}", serde_json::to_string(&probe.readiness().await)?);

    let entity = fetcher.fetch(1, false).await?;
    println!("#{} {} generation {}", entity.id(), entity.entity.name, entity.generation);

    let ranges = RangeSynchronizer::from_config(&config, fetcher);
    let page = ranges.sync(catalog_mirror::validation::parse_range(Some("20"), Some("0"))?).await?;
    println!("range: {} entities, report {:?}", page.entities.len(), page.report);

    let counters = connect_counter_store(&config.rate_limit, clock.clone()).await;
    println!("rate limit backend: {}", counters.backend());

    let enforcer = RateLimitEnforcer::new(counters, config.rate_limit.policies.clone(), clock);
    let seed_route = RateLimitLayer::from_config(enforcer, RouteCategory::Seed, &config.rate_limit)
        .layer(service_fn(|_req: Request<String>| async {
            Ok::<_, Infallible>(Response::new("seeded".to_string()))
        }));

    for attempt in 1..=5 {
        let req = Request::builder()
            .uri("/api/seed")
            .header("x-forwarded-for", "203.0.113.50")
            .body(String::new())?;
        let response = seed_route.clone().oneshot(req).await?;
        println!(
            "seed attempt {attempt}: {} remaining={:?}",
            response.status(),
            response.headers().get("ratelimit-remaining")
        );
    }

    Ok(())
}

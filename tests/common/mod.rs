#![allow(dead_code)]

use async_trait::async_trait;
use catalog_mirror::clock::ManualClock;
use catalog_mirror::model::{EntityId, ReferenceKind};
use catalog_mirror::upstream::{EntityPayload, NamedResource, ReferencePayload, UpstreamSource};
use catalog_mirror::{EntityFetcher, MemoryCatalogStore, UpstreamError};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE: &str = "https://upstream.test/api/v2";
pub const START_MILLIS: u64 = 1_700_000_000_000;

pub fn link(resource: &str, id: u32, name: &str) -> Value {
    json!({ "name": name, "url": format!("{BASE}/{resource}/{id}/") })
}

/// Entity record shaped like the upstream payload: two categories, two traits (one hidden), two
/// metrics.
pub fn entity_json(id: EntityId, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "height": 7,
        "weight": 69,
        "base_experience": 64,
        "order": 1,
        "sprites": { "front_default": format!("https://img.test/{id}.png"), "back_default": null },
        "cries": { "latest": format!("https://cries.test/{id}.ogg") },
        "types": [
            { "slot": 2, "type": link("type", 4, "poison") },
            { "slot": 1, "type": link("type", 12, "grass") }
        ],
        "abilities": [
            { "slot": 1, "is_hidden": false, "ability": link("ability", 65, "overgrow") },
            { "slot": 3, "is_hidden": true, "ability": link("ability", 34, "chlorophyll") }
        ],
        "stats": [
            { "base_stat": 45, "effort": 0, "stat": link("stat", 1, "hp") },
            { "base_stat": 49, "effort": 1, "stat": link("stat", 2, "attack") }
        ]
    })
}

/// Scripted upstream: serves configured records, fails on demand, counts calls.
#[derive(Debug, Default)]
pub struct FakeUpstream {
    entities: Mutex<HashMap<EntityId, Value>>,
    failing: Mutex<HashSet<EntityId>>,
    catalog_down: Mutex<bool>,
    failing_references: Mutex<HashSet<(ReferenceKind, u32)>>,
    calls: Mutex<HashMap<EntityId, usize>>,
    reference_calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve default records for every id in `ids`.
    pub fn with_entities(self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        for id in ids {
            self.set_entity(id, entity_json(id, &format!("entity-{id}")));
        }
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn set_entity(&self, id: EntityId, record: Value) {
        self.entities.lock().unwrap().insert(id, record);
    }

    pub fn fail(&self, id: EntityId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn recover(&self, id: EntityId) {
        self.failing.lock().unwrap().remove(&id);
    }

    pub fn fail_reference(&self, kind: ReferenceKind, id: u32) {
        self.failing_references.lock().unwrap().insert((kind, id));
    }

    pub fn recover_reference(&self, kind: ReferenceKind, id: u32) {
        self.failing_references.lock().unwrap().remove(&(kind, id));
    }

    pub fn set_catalog_down(&self, down: bool) {
        *self.catalog_down.lock().unwrap() = down;
    }

    pub fn calls_for(&self, id: EntityId) -> usize {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn reference_calls(&self) -> usize {
        self.reference_calls.load(Ordering::SeqCst)
    }

    /// Highest number of entity fetches observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn catalog(kind: ReferenceKind) -> Vec<(u32, &'static str)> {
        match kind {
            ReferenceKind::Category => vec![(1, "normal"), (4, "poison"), (12, "grass")],
            ReferenceKind::Trait => vec![(34, "chlorophyll"), (65, "overgrow")],
            ReferenceKind::Metric => vec![(1, "hp"), (2, "attack")],
        }
    }
}

#[async_trait]
impl UpstreamSource for FakeUpstream {
    async fn fetch_entity(&self, id: EntityId) -> Result<EntityPayload, UpstreamError> {
        *self.calls.lock().unwrap().entry(id).or_default() += 1;
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        let url = format!("{BASE}/pokemon/{id}");
        if self.failing.lock().unwrap().contains(&id) {
            return Err(UpstreamError::Status { status: 503, url });
        }
        let record = self.entities.lock().unwrap().get(&id).cloned();
        match record {
            Some(record) => serde_json::from_value(record)
                .map_err(|e| UpstreamError::Decode(e.to_string())),
            None => Err(UpstreamError::Status { status: 404, url }),
        }
    }

    async fn list_references(
        &self,
        kind: ReferenceKind,
    ) -> Result<Vec<NamedResource>, UpstreamError> {
        self.reference_calls.fetch_add(1, Ordering::SeqCst);
        let resource = kind.upstream_resource();
        if *self.catalog_down.lock().unwrap() {
            return Err(UpstreamError::Transport(format!("{resource} listing refused")));
        }
        Ok(Self::catalog(kind)
            .into_iter()
            .map(|(id, name)| NamedResource {
                name: name.to_string(),
                url: format!("{BASE}/{resource}/{id}/"),
            })
            .collect())
    }

    async fn fetch_reference(
        &self,
        kind: ReferenceKind,
        id: u32,
    ) -> Result<ReferencePayload, UpstreamError> {
        self.reference_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_references.lock().unwrap().contains(&(kind, id)) {
            return Err(UpstreamError::Status {
                status: 503,
                url: format!("{BASE}/{}/{id}", kind.upstream_resource()),
            });
        }
        let name = Self::catalog(kind)
            .into_iter()
            .find(|(ref_id, _)| *ref_id == id)
            .map(|(_, name)| name)
            .ok_or_else(|| UpstreamError::Status {
                status: 404,
                url: format!("{BASE}/{}/{id}", kind.upstream_resource()),
            })?;
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "generation": link("generation", 1, "generation-i"),
            "game_index": id,
            "is_battle_only": false
        }))
        .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

/// Fetcher wired to a fresh in-memory store and a manual clock.
pub struct Harness {
    pub upstream: Arc<FakeUpstream>,
    pub store: MemoryCatalogStore,
    pub clock: ManualClock,
    pub fetcher: EntityFetcher,
}

impl Harness {
    pub fn new(upstream: FakeUpstream, entity_ttl: Duration) -> Self {
        let upstream = Arc::new(upstream);
        let store = MemoryCatalogStore::new();
        let clock = ManualClock::new(START_MILLIS);
        let fetcher = EntityFetcher::new(
            upstream.clone(),
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            entity_ttl,
        );
        Self { upstream, store, clock, fetcher }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

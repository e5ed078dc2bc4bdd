mod common;

use catalog_mirror::model::ReferenceKind;
use catalog_mirror::{CatalogStore, Clock};
use common::{entity_json, link, FakeUpstream, Harness};
use serde_json::json;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::test]
async fn missing_entity_is_populated_from_upstream() {
    common::init_tracing();
    let h = Harness::new(FakeUpstream::new().with_entities([1]), DAY);

    let snapshot = h.fetcher.fetch(1, false).await.unwrap();

    assert_eq!(h.upstream.calls_for(1), 1);
    assert_eq!(snapshot.entity.name, "entity-1");
    assert_eq!(snapshot.entity.height, Some(7));
    assert_eq!(snapshot.entity.base_experience, Some(64));
    assert_eq!(snapshot.entity.sprites.front_default.as_deref(), Some("https://img.test/1.png"));
    assert!(snapshot.entity.cries.is_some());
    assert_eq!(snapshot.last_fetched(), Some(h.clock.now()));
    assert_eq!(snapshot.generation, 1);

    let categories: Vec<_> = snapshot
        .relations_of(ReferenceKind::Category)
        .map(|r| (r.record.slot, r.reference_name.as_str()))
        .collect();
    assert_eq!(categories, vec![(1, "grass"), (2, "poison")]);

    let traits: Vec<_> = snapshot
        .relations_of(ReferenceKind::Trait)
        .map(|r| (r.record.slot, r.record.hidden, r.reference_name.as_str()))
        .collect();
    assert_eq!(traits, vec![(1, false, "overgrow"), (3, true, "chlorophyll")]);

    let metrics: Vec<_> = snapshot
        .relations_of(ReferenceKind::Metric)
        .map(|r| (r.record.slot, r.record.base_value, r.record.effort))
        .collect();
    assert_eq!(metrics, vec![(1, Some(45), Some(0)), (2, Some(49), Some(1))]);

    let grass = h.store.reference(ReferenceKind::Category, 12).await.unwrap().unwrap();
    assert_eq!(grass.name, "grass");
}

#[tokio::test]
async fn fresh_entity_is_served_without_upstream_call() {
    let h = Harness::new(FakeUpstream::new().with_entities([7]), DAY);

    let first = h.fetcher.fetch(7, false).await.unwrap();
    h.clock.advance(Duration::from_secs(60 * 60));
    let second = h.fetcher.fetch(7, false).await.unwrap();

    assert_eq!(h.upstream.calls_for(7), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn expired_entity_is_refreshed() {
    let h = Harness::new(FakeUpstream::new().with_entities([7]), DAY);

    h.fetcher.fetch(7, false).await.unwrap();
    h.clock.advance(DAY);
    let refreshed = h.fetcher.fetch(7, false).await.unwrap();

    assert_eq!(h.upstream.calls_for(7), 2);
    assert_eq!(refreshed.generation, 2);
    assert_eq!(refreshed.last_fetched(), Some(h.clock.now()));
}

#[tokio::test]
async fn forced_fetch_always_calls_upstream() {
    let h = Harness::new(FakeUpstream::new().with_entities([3]), DAY);

    h.fetcher.fetch(3, false).await.unwrap();
    h.fetcher.fetch(3, true).await.unwrap();
    h.fetcher.fetch(3, true).await.unwrap();

    assert_eq!(h.upstream.calls_for(3), 3);
}

#[tokio::test]
async fn refresh_swaps_the_whole_relation_set() {
    let h = Harness::new(FakeUpstream::new().with_entities([5]), DAY);
    h.fetcher.fetch(5, false).await.unwrap();

    let mut changed = entity_json(5, "entity-5");
    changed["types"] = json!([{ "slot": 1, "type": link("type", 1, "normal") }]);
    changed["abilities"] = json!([]);
    h.upstream.set_entity(5, changed);

    let refreshed = h.fetcher.fetch(5, true).await.unwrap();
    let categories: Vec<_> =
        refreshed.relations_of(ReferenceKind::Category).map(|r| r.record.reference_id).collect();
    assert_eq!(categories, vec![1]);
    assert_eq!(refreshed.relations_of(ReferenceKind::Trait).count(), 0);
    assert_eq!(refreshed.relations_of(ReferenceKind::Metric).count(), 2);
    assert_eq!(refreshed.generation, 2);
}

#[tokio::test]
async fn upstream_failure_is_surfaced_even_with_a_stored_copy() {
    let h = Harness::new(FakeUpstream::new().with_entities([9]), DAY);
    h.fetcher.fetch(9, false).await.unwrap();
    h.upstream.fail(9);

    let err = h.fetcher.fetch(9, true).await.unwrap_err();
    assert!(err.is_upstream());
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn stale_copy_is_served_when_configured() {
    let h = Harness::new(FakeUpstream::new().with_entities([9]), DAY);
    let fetcher = h.fetcher.clone().with_serve_stale_on_error(true);
    let stored = fetcher.fetch(9, false).await.unwrap();
    h.upstream.fail(9);
    h.clock.advance(DAY * 2);

    let served = fetcher.fetch(9, false).await.unwrap();
    assert_eq!(served, stored);
    assert_eq!(h.upstream.calls_for(9), 2);

    let err = fetcher.fetch(10, false).await.unwrap_err();
    assert!(err.is_not_found(), "nothing stored for 10, so the upstream 404 surfaces");
}

#[tokio::test]
async fn invalid_ids_are_rejected_before_any_io() {
    let h = Harness::new(FakeUpstream::new(), DAY);
    for id in [0, 10_001] {
        let err = h.fetcher.fetch(id, false).await.unwrap_err();
        assert!(err.is_validation(), "id {id} should fail validation");
    }
    assert_eq!(h.upstream.total_calls(), 0);
}

#[tokio::test]
async fn concurrent_refreshes_share_one_upstream_call() {
    let upstream = FakeUpstream::new().with_entities([25]).with_delay(Duration::from_millis(50));
    let h = Harness::new(upstream, DAY);

    let results =
        futures::future::join_all((0..10).map(|_| h.fetcher.fetch(25, false))).await;

    assert_eq!(h.upstream.calls_for(25), 1);
    assert_eq!(h.fetcher.in_flight(), 0);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
}

#[tokio::test]
async fn shared_failure_reaches_every_waiter() {
    let upstream = FakeUpstream::new().with_entities([4]).with_delay(Duration::from_millis(30));
    upstream.fail(4);
    let h = Harness::new(upstream, DAY);

    let results = futures::future::join_all((0..5).map(|_| h.fetcher.fetch(4, true))).await;

    assert_eq!(h.upstream.calls_for(4), 1);
    assert!(results.iter().all(|r| r.as_ref().is_err_and(|e| e.is_upstream())));

    h.upstream.recover(4);
    assert!(h.fetcher.fetch(4, true).await.is_ok());
    assert_eq!(h.upstream.calls_for(4), 2);
}

#[tokio::test]
async fn mismatched_payload_id_is_not_stored() {
    let h = Harness::new(FakeUpstream::new(), DAY);
    h.upstream.set_entity(2, entity_json(3, "wrong"));

    let err = h.fetcher.fetch(2, false).await.unwrap_err();
    assert!(err.is_upstream());
    assert!(h.store.get(2).await.unwrap().is_none());
    assert!(h.store.get(3).await.unwrap().is_none());
}

use super::CatalogStore;
use crate::error::StoreError;
use crate::model::{
    CatalogEntity, EntityId, EntitySnapshot, ReferenceEntity, ReferenceKind, RefreshCommit,
    RelationRecord, ResolvedRelation,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug)]
struct StoredEntity {
    entity: CatalogEntity,
    /// Shared with readers; a refresh installs a new set rather than editing this one.
    relations: Arc<[RelationRecord]>,
    generation: u64,
}

#[derive(Debug, Default)]
struct State {
    entities: BTreeMap<EntityId, StoredEntity>,
    references: HashMap<(ReferenceKind, u32), ReferenceEntity>,
}

impl State {
    fn snapshot(&self, stored: &StoredEntity) -> EntitySnapshot {
        let mut relations: Vec<ResolvedRelation> = stored
            .relations
            .iter()
            .map(|record| ResolvedRelation {
                record: record.clone(),
                reference_name: self
                    .references
                    .get(&(record.kind, record.reference_id))
                    .map(|r| r.name.clone())
                    .unwrap_or_default(),
            })
            .collect();
        relations.sort_by_key(|r| (r.record.kind, r.record.slot));
        EntitySnapshot { entity: stored.entity.clone(), relations, generation: stored.generation }
    }
}

/// In-process [`CatalogStore`].
///
/// Each entity's relation set lives inside the entity's own slot, and a refresh replaces the
/// slot under one write lock, so relation generations can never interleave. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    state: Arc<RwLock<State>>,
    offline: Arc<AtomicBool>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreError::Unavailable` (fault injection).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entities.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.check_online()?;
        self.state.read().map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.check_online()?;
        self.state.write().map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get(&self, id: EntityId) -> Result<Option<EntitySnapshot>, StoreError> {
        let state = self.read()?;
        Ok(state.entities.get(&id).map(|stored| state.snapshot(stored)))
    }

    async fn range(
        &self,
        first: EntityId,
        last: EntityId,
    ) -> Result<Vec<EntitySnapshot>, StoreError> {
        if first > last {
            return Ok(Vec::new());
        }
        let state = self.read()?;
        Ok(state.entities.range(first..=last).map(|(_, stored)| state.snapshot(stored)).collect())
    }

    async fn commit_refresh(&self, commit: RefreshCommit) -> Result<u64, StoreError> {
        let RefreshCommit { entity, references, relations } = commit;
        if entity.last_fetched.is_none() {
            return Err(StoreError::Rejected {
                id: entity.id,
                reason: "refresh commit without a fetch timestamp".into(),
            });
        }

        let mut state = self.write()?;
        for reference in references {
            state
                .references
                .entry((reference.kind, reference.id))
                .and_modify(|existing| existing.last_fetched = entity.last_fetched)
                .or_insert_with(|| ReferenceEntity { last_fetched: entity.last_fetched, ..reference });
        }

        let generation = state.entities.get(&entity.id).map(|s| s.generation + 1).unwrap_or(1);
        let id = entity.id;
        state.entities.insert(id, StoredEntity { entity, relations: relations.into(), generation });
        Ok(generation)
    }

    async fn upsert_references(&self, references: Vec<ReferenceEntity>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        for reference in references {
            state.references.insert((reference.kind, reference.id), reference);
        }
        Ok(())
    }

    async fn reference(
        &self,
        kind: ReferenceKind,
        id: u32,
    ) -> Result<Option<ReferenceEntity>, StoreError> {
        Ok(self.read()?.references.get(&(kind, id)).cloned())
    }

    async fn count_references(&self, kind: ReferenceKind) -> Result<usize, StoreError> {
        Ok(self.read()?.references.keys().filter(|(k, _)| *k == kind).count())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sprites;
    use chrono::{TimeZone, Utc};

    fn commit(id: EntityId, name: &str, categories: &[(u32, &str, u32)], at_secs: i64) -> RefreshCommit {
        let fetched = Utc.timestamp_opt(at_secs, 0).single();
        RefreshCommit {
            entity: CatalogEntity {
                id,
                name: name.into(),
                height: Some(7),
                weight: Some(69),
                base_experience: None,
                order: Some(id as i32),
                sprites: Sprites::default(),
                cries: None,
                last_fetched: fetched,
            },
            references: categories
                .iter()
                .map(|(ref_id, ref_name, _)| ReferenceEntity::named(ReferenceKind::Category, *ref_id, *ref_name))
                .collect(),
            relations: categories
                .iter()
                .map(|(ref_id, _, slot)| RelationRecord {
                    kind: ReferenceKind::Category,
                    reference_id: *ref_id,
                    slot: *slot,
                    hidden: false,
                    base_value: None,
                    effort: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn refresh_replaces_the_whole_relation_set() {
        let store = MemoryCatalogStore::new();
        let first = store.commit_refresh(commit(1, "a", &[(12, "grass", 1), (4, "poison", 2)], 10)).await.unwrap();
        let second = store.commit_refresh(commit(1, "a", &[(10, "fire", 1)], 20)).await.unwrap();
        assert_eq!((first, second), (1, 2));

        let snap = store.get(1).await.unwrap().unwrap();
        assert_eq!(snap.generation, 2);
        let ids: Vec<_> = snap.relations.iter().map(|r| r.record.reference_id).collect();
        assert_eq!(ids, vec![10]);
        assert_eq!(snap.relations[0].reference_name, "fire");
        // references outlive the relations that introduced them
        assert!(store.reference(ReferenceKind::Category, 12).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn relations_are_ordered_by_slot() {
        let store = MemoryCatalogStore::new();
        store.commit_refresh(commit(3, "c", &[(4, "poison", 2), (12, "grass", 1)], 10)).await.unwrap();
        let snap = store.get(3).await.unwrap().unwrap();
        let slots: Vec<_> = snap.relations.iter().map(|r| r.record.slot).collect();
        assert_eq!(slots, vec![1, 2]);
    }

    #[tokio::test]
    async fn opportunistic_upsert_keeps_seeded_details() {
        let store = MemoryCatalogStore::new();
        let mut seeded = ReferenceEntity::named(ReferenceKind::Category, 12, "grass");
        seeded.generation = Some(1);
        store.upsert_references(vec![seeded]).await.unwrap();

        store.commit_refresh(commit(1, "a", &[(12, "grass", 1)], 50)).await.unwrap();
        let reference = store.reference(ReferenceKind::Category, 12).await.unwrap().unwrap();
        assert_eq!(reference.generation, Some(1));
        assert_eq!(reference.last_fetched.map(|t| t.timestamp()), Some(50));
    }

    #[tokio::test]
    async fn range_is_inclusive_and_sorted() {
        let store = MemoryCatalogStore::new();
        for id in [5, 2, 9, 3] {
            store.commit_refresh(commit(id, "x", &[], 1)).await.unwrap();
        }
        let ids: Vec<_> = store.range(2, 5).await.unwrap().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![2, 3, 5]);
        assert!(store.range(6, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unstamped_commit_is_rejected() {
        let store = MemoryCatalogStore::new();
        let mut c = commit(1, "a", &[], 1);
        c.entity.last_fetched = None;
        assert!(matches!(store.commit_refresh(c).await, Err(StoreError::Rejected { id: 1, .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryCatalogStore::new();
        store.set_offline(true);
        assert!(store.ping().await.is_err());
        assert!(store.get(1).await.is_err());
        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}

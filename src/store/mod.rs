//! Local persistence seam.
//!
//! The mirror reads and writes through [`CatalogStore`]. Implementations must apply a
//! [`RefreshCommit`] atomically: a reader sees either the previous entity row with the previous
//! relation set, or the new row with the new set, never a mix.

use crate::error::StoreError;
use crate::model::{EntityId, EntitySnapshot, ReferenceEntity, ReferenceKind, RefreshCommit};
use async_trait::async_trait;

mod memory;

pub use memory::MemoryCatalogStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Entity plus its current relation set.
    async fn get(&self, id: EntityId) -> Result<Option<EntitySnapshot>, StoreError>;

    /// Stored entities with `first <= id <= last`, ascending by id.
    async fn range(&self, first: EntityId, last: EntityId)
        -> Result<Vec<EntitySnapshot>, StoreError>;

    /// Apply one refresh: upsert the scalar row and referenced records, swap the relation set.
    ///
    /// Returns the entity's new generation.
    async fn commit_refresh(&self, commit: RefreshCommit) -> Result<u64, StoreError>;

    /// Create or overwrite reference records with full detail.
    async fn upsert_references(&self, references: Vec<ReferenceEntity>) -> Result<(), StoreError>;

    async fn reference(
        &self,
        kind: ReferenceKind,
        id: u32,
    ) -> Result<Option<ReferenceEntity>, StoreError>;

    async fn count_references(&self, kind: ReferenceKind) -> Result<usize, StoreError>;

    /// Cheap reachability check used by health probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

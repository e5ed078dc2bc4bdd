//! Read-only access to the upstream catalog.
//!
//! The fetcher and seeder only see [`UpstreamSource`]; [`HttpUpstream`] is the production
//! implementation over HTTP/JSON, and tests plug in scripted fakes.

use crate::error::UpstreamError;
use crate::model::{EntityId, ReferenceKind};
use async_trait::async_trait;

#[cfg(feature = "http-upstream")]
mod http;
mod payload;

#[cfg(feature = "http-upstream")]
pub use http::HttpUpstream;
pub use payload::{
    reference_id_from_url, CategorySlot, EntityPayload, MetricValue, NamedResource,
    ReferencePayload, ResourceList, SpritesPayload, TraitSlot,
};

/// Source of truth the local mirror is populated from.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Full record for one entity, including its relation links.
    async fn fetch_entity(&self, id: EntityId) -> Result<EntityPayload, UpstreamError>;

    /// Every reference of `kind` the upstream knows about.
    async fn list_references(&self, kind: ReferenceKind)
        -> Result<Vec<NamedResource>, UpstreamError>;

    /// Detail record of one reference.
    async fn fetch_reference(
        &self,
        kind: ReferenceKind,
        id: u32,
    ) -> Result<ReferencePayload, UpstreamError>;
}

//! Mirrored record shapes.
//!
//! A [`CatalogEntity`] is keyed by the id upstream assigned to it. It links to shared
//! [`ReferenceEntity`] rows (categories, traits, metrics) through [`RelationRecord`]s. The
//! relation set of one entity is always replaced as a whole, so every [`EntitySnapshot`] carries
//! relations from exactly one refresh, identified by its `generation`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream-assigned numeric id.
pub type EntityId = u32;

/// Kinds of shared reference records an entity can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// Classification of an entity (upstream "type").
    Category,
    /// Capability of an entity (upstream "ability").
    Trait,
    /// Numeric attribute of an entity (upstream "stat").
    Metric,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 3] = [Self::Category, Self::Trait, Self::Metric];

    /// Path segment of the upstream listing for this kind.
    pub fn upstream_resource(self) -> &'static str {
        match self {
            Self::Category => "type",
            Self::Trait => "ability",
            Self::Metric => "stat",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Category => "category",
            Self::Trait => "trait",
            Self::Metric => "metric",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprites {
    pub front_default: Option<String>,
    pub back_default: Option<String>,
    pub front_shiny: Option<String>,
    pub back_shiny: Option<String>,
}

/// Scalar row of a mirrored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntity {
    pub id: EntityId,
    pub name: String,
    pub height: Option<u32>,
    pub weight: Option<u32>,
    pub base_experience: Option<u32>,
    pub order: Option<i32>,
    pub sprites: Sprites,
    pub cries: Option<serde_json::Value>,
    /// Unset only before the first successful population.
    pub last_fetched: Option<DateTime<Utc>>,
}

/// Shared record referenced by many entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntity {
    pub kind: ReferenceKind,
    pub id: u32,
    pub name: String,
    pub generation: Option<u32>,
    pub game_index: Option<u32>,
    pub battle_only: Option<bool>,
    pub last_fetched: Option<DateTime<Utc>>,
}

impl ReferenceEntity {
    /// Minimal row as discovered through an entity payload.
    pub fn named(kind: ReferenceKind, id: u32, name: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            name: name.into(),
            generation: None,
            game_index: None,
            battle_only: None,
            last_fetched: None,
        }
    }
}

/// Join row between an entity and a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationRecord {
    pub kind: ReferenceKind,
    pub reference_id: u32,
    pub slot: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<u32>,
}

/// Relation joined with its reference's name, as returned to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRelation {
    #[serde(flatten)]
    pub record: RelationRecord,
    pub reference_name: String,
}

/// Canonical stored shape of one entity: scalar row plus one complete relation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub entity: CatalogEntity,
    /// Ordered by kind, then slot.
    pub relations: Vec<ResolvedRelation>,
    /// Refresh counter; bumps on every committed refresh of this entity.
    pub generation: u64,
}

impl EntitySnapshot {
    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.entity.last_fetched
    }

    pub fn relations_of(&self, kind: ReferenceKind) -> impl Iterator<Item = &ResolvedRelation> {
        self.relations.iter().filter(move |r| r.record.kind == kind)
    }
}

/// Everything one upstream refresh of an entity writes, applied by the store as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshCommit {
    pub entity: CatalogEntity,
    pub references: Vec<ReferenceEntity>,
    pub relations: Vec<RelationRecord>,
}

//! Wire shapes of the upstream catalog and their translation into store writes.

use crate::error::UpstreamError;
use crate::model::{
    CatalogEntity, EntityId, ReferenceEntity, ReferenceKind, RefreshCommit, RelationRecord, Sprites,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `{ name, url }` link to another upstream resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamedResource {
    pub name: String,
    pub url: String,
}

impl NamedResource {
    /// Numeric id carried in the link's final path segment.
    pub fn id(&self) -> Result<u32, UpstreamError> {
        reference_id_from_url(&self.url)
            .ok_or_else(|| UpstreamError::Decode(format!("no numeric id in url '{}'", self.url)))
    }
}

/// Extract the numeric id from the final path segment of an upstream url.
///
/// `https://host/api/v2/type/12/` yields `Some(12)`; trailing slashes are ignored.
pub fn reference_id_from_url(url: &str) -> Option<u32> {
    url.trim_end_matches('/').rsplit('/').next().and_then(|segment| segment.parse().ok())
}

/// Paged listing of a resource collection.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceList {
    pub count: u32,
    pub results: Vec<NamedResource>,
    pub next: Option<String>,
    pub previous: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpritesPayload {
    pub front_default: Option<String>,
    pub back_default: Option<String>,
    pub front_shiny: Option<String>,
    pub back_shiny: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySlot {
    pub slot: u32,
    #[serde(rename = "type")]
    pub category: NamedResource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraitSlot {
    pub slot: u32,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(rename = "ability")]
    pub trait_ref: NamedResource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricValue {
    pub base_stat: u32,
    pub effort: u32,
    #[serde(rename = "stat")]
    pub metric: NamedResource,
}

/// Full upstream record for one entity.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityPayload {
    pub id: EntityId,
    pub name: String,
    pub height: Option<u32>,
    pub weight: Option<u32>,
    pub base_experience: Option<u32>,
    pub order: Option<i32>,
    #[serde(default)]
    pub sprites: Option<SpritesPayload>,
    #[serde(default)]
    pub cries: Option<serde_json::Value>,
    #[serde(default, rename = "types")]
    pub categories: Vec<CategorySlot>,
    #[serde(default, rename = "abilities")]
    pub traits: Vec<TraitSlot>,
    #[serde(default, rename = "stats")]
    pub metrics: Vec<MetricValue>,
}

impl EntityPayload {
    /// Translate into the unit of writes for one refresh, stamped at `fetched_at`.
    ///
    /// Category and trait relations keep their upstream slots; metrics have none upstream and are
    /// slotted by position, starting at 1.
    pub fn into_commit(self, fetched_at: DateTime<Utc>) -> Result<RefreshCommit, UpstreamError> {
        let mut references = Vec::new();
        let mut relations = Vec::new();

        for entry in &self.categories {
            let id = entry.category.id()?;
            references.push(ReferenceEntity::named(ReferenceKind::Category, id, &entry.category.name));
            relations.push(RelationRecord {
                kind: ReferenceKind::Category,
                reference_id: id,
                slot: entry.slot,
                hidden: false,
                base_value: None,
                effort: None,
            });
        }
        for entry in &self.traits {
            let id = entry.trait_ref.id()?;
            references.push(ReferenceEntity::named(ReferenceKind::Trait, id, &entry.trait_ref.name));
            relations.push(RelationRecord {
                kind: ReferenceKind::Trait,
                reference_id: id,
                slot: entry.slot,
                hidden: entry.is_hidden,
                base_value: None,
                effort: None,
            });
        }
        for (position, entry) in self.metrics.iter().enumerate() {
            let id = entry.metric.id()?;
            references.push(ReferenceEntity::named(ReferenceKind::Metric, id, &entry.metric.name));
            relations.push(RelationRecord {
                kind: ReferenceKind::Metric,
                reference_id: id,
                slot: u32::try_from(position + 1).unwrap_or(u32::MAX),
                hidden: false,
                base_value: Some(entry.base_stat),
                effort: Some(entry.effort),
            });
        }

        let sprites = self.sprites.unwrap_or_default();
        let entity = CatalogEntity {
            id: self.id,
            name: self.name,
            height: self.height,
            weight: self.weight,
            base_experience: self.base_experience,
            order: self.order,
            sprites: Sprites {
                front_default: sprites.front_default,
                back_default: sprites.back_default,
                front_shiny: sprites.front_shiny,
                back_shiny: sprites.back_shiny,
            },
            cries: self.cries,
            last_fetched: Some(fetched_at),
        };

        Ok(RefreshCommit { entity, references, relations })
    }
}

/// Upstream detail record for a reference (category, trait or metric).
#[derive(Debug, Clone, Deserialize)]
pub struct ReferencePayload {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub generation: Option<NamedResource>,
    #[serde(default)]
    pub game_index: Option<u32>,
    #[serde(default)]
    pub is_battle_only: Option<bool>,
}

impl ReferencePayload {
    pub fn into_reference(self, kind: ReferenceKind, fetched_at: DateTime<Utc>) -> ReferenceEntity {
        ReferenceEntity {
            kind,
            id: self.id,
            name: self.name,
            generation: self.generation.as_ref().and_then(|g| generation_number(&g.name)),
            game_index: self.game_index,
            battle_only: self.is_battle_only,
            last_fetched: Some(fetched_at),
        }
    }
}

/// `"generation-iv"` -> 4. Upstream names generations with roman numerals.
fn generation_number(name: &str) -> Option<u32> {
    let numeral = name.strip_prefix("generation-")?;
    if let Ok(n) = numeral.parse::<u32>() {
        return Some(n);
    }
    let value = |c: char| match c {
        'i' => Some(1),
        'v' => Some(5),
        'x' => Some(10),
        _ => None,
    };
    let digits: Option<Vec<u32>> = numeral.chars().map(value).collect();
    roman_total(&digits?)
}

fn roman_total(digits: &[u32]) -> Option<u32> {
    let mut total: i64 = 0;
    for (i, d) in digits.iter().enumerate() {
        let d = i64::from(*d);
        match digits.get(i + 1) {
            Some(next) if i64::from(*next) > d => total -= d,
            _ => total += d,
        }
    }
    u32::try_from(total).ok().filter(|t| *t > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_come_from_the_final_path_segment() {
        assert_eq!(reference_id_from_url("https://pokeapi.co/api/v2/type/12/"), Some(12));
        assert_eq!(reference_id_from_url("https://pokeapi.co/api/v2/stat/6"), Some(6));
        assert_eq!(reference_id_from_url("https://pokeapi.co/api/v2/type/grass/"), None);
        assert_eq!(reference_id_from_url(""), None);
    }

    #[test]
    fn generation_names_become_numbers() {
        assert_eq!(generation_number("generation-i"), Some(1));
        assert_eq!(generation_number("generation-iv"), Some(4));
        assert_eq!(generation_number("generation-ix"), Some(9));
        assert_eq!(generation_number("generation-viii"), Some(8));
        assert_eq!(generation_number("generation-3"), Some(3));
        assert_eq!(generation_number("gen-q"), None);
    }

    #[test]
    fn payload_translates_into_one_commit() {
        let payload: EntityPayload = serde_json::from_value(json!({
            "id": 1,
            "name": "bulbasaur",
            "height": 7,
            "weight": 69,
            "base_experience": 64,
            "order": 1,
            "sprites": {"front_default": "https://img/1.png"},
            "types": [
                {"slot": 1, "type": {"name": "grass", "url": "https://up/type/12/"}},
                {"slot": 2, "type": {"name": "poison", "url": "https://up/type/4/"}}
            ],
            "abilities": [
                {"slot": 1, "is_hidden": false, "ability": {"name": "overgrow", "url": "https://up/ability/65/"}},
                {"slot": 3, "is_hidden": true, "ability": {"name": "chlorophyll", "url": "https://up/ability/34/"}}
            ],
            "stats": [
                {"base_stat": 45, "effort": 0, "stat": {"name": "hp", "url": "https://up/stat/1/"}},
                {"base_stat": 49, "effort": 0, "stat": {"name": "attack", "url": "https://up/stat/2/"}}
            ]
        }))
        .unwrap();

        let now = Utc::now();
        let commit = payload.into_commit(now).unwrap();
        assert_eq!(commit.entity.name, "bulbasaur");
        assert_eq!(commit.entity.last_fetched, Some(now));
        assert_eq!(commit.entity.sprites.front_default.as_deref(), Some("https://img/1.png"));
        assert_eq!(commit.references.len(), 6);

        let slots: Vec<_> = commit
            .relations
            .iter()
            .map(|r| (r.kind, r.reference_id, r.slot, r.hidden))
            .collect();
        assert_eq!(
            slots,
            vec![
                (ReferenceKind::Category, 12, 1, false),
                (ReferenceKind::Category, 4, 2, false),
                (ReferenceKind::Trait, 65, 1, false),
                (ReferenceKind::Trait, 34, 3, true),
                (ReferenceKind::Metric, 1, 1, false),
                (ReferenceKind::Metric, 2, 2, false),
            ]
        );
        assert_eq!(commit.relations[4].base_value, Some(45));
    }

    #[test]
    fn relation_without_numeric_url_is_a_decode_error() {
        let payload: EntityPayload = serde_json::from_value(json!({
            "id": 2, "name": "ivysaur", "height": 10, "weight": 130,
            "base_experience": null, "order": 2,
            "types": [{"slot": 1, "type": {"name": "grass", "url": "https://up/type/grass/"}}]
        }))
        .unwrap();
        assert!(matches!(payload.into_commit(Utc::now()), Err(UpstreamError::Decode(_))));
    }
}

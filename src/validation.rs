//! Input validation for ids and ranges.
//!
//! Everything here runs before the mirror touches the store or upstream, so a malformed request
//! never costs an upstream call.

use crate::error::ValidationError;
use crate::model::EntityId;

/// Largest id the upstream catalog assigns.
pub const MAX_ENTITY_ID: u32 = 10_000;
/// Largest range a single sync may cover.
pub const MAX_RANGE_LIMIT: u32 = 1_000;
pub const DEFAULT_RANGE_LIMIT: u32 = 151;

/// Check a numeric id against the upstream id space.
pub fn validate_entity_id(id: i64) -> Result<EntityId, ValidationError> {
    if id < 1 || id > i64::from(MAX_ENTITY_ID) {
        return Err(ValidationError::IdOutOfRange { id, max: MAX_ENTITY_ID });
    }
    // bounds checked above
    Ok(id as EntityId)
}

/// Parse an id from a path segment or query value.
pub fn parse_entity_id(raw: &str) -> Result<EntityId, ValidationError> {
    let trimmed = raw.trim();
    let id = trimmed
        .parse::<i64>()
        .map_err(|_| ValidationError::InvalidId { raw: trimmed.to_string() })?;
    validate_entity_id(id)
}

/// Parse a comma separated id list, silently dropping invalid entries.
pub fn parse_entity_ids(raw: &str) -> Vec<EntityId> {
    raw.split(',').filter_map(|part| parse_entity_id(part).ok()).collect()
}

/// Contiguous id range `[offset + 1, offset + limit]`, never reaching past [`MAX_ENTITY_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    offset: u32,
    limit: u32,
}

impl IdRange {
    /// Strict constructor: rejects an empty or oversized range and one starting past the last
    /// upstream id. A range running over the end is cut at [`MAX_ENTITY_ID`].
    pub fn new(offset: u32, limit: u32) -> Result<Self, ValidationError> {
        if limit == 0 {
            return Err(ValidationError::InvalidRange { reason: "limit must be at least 1".into() });
        }
        if limit > MAX_RANGE_LIMIT {
            return Err(ValidationError::InvalidRange {
                reason: format!("limit {limit} exceeds {MAX_RANGE_LIMIT}"),
            });
        }
        if offset >= MAX_ENTITY_ID {
            return Err(ValidationError::InvalidRange {
                reason: format!("offset {offset} is past the last id {MAX_ENTITY_ID}"),
            });
        }
        Ok(Self { offset, limit: limit.min(MAX_ENTITY_ID - offset) })
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// First id in the range.
    pub fn first(&self) -> EntityId {
        self.offset + 1
    }

    /// Last id in the range (inclusive).
    pub fn last(&self) -> EntityId {
        self.offset + self.limit
    }

    pub fn contains(&self, id: EntityId) -> bool {
        (self.first()..=self.last()).contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> {
        self.first()..=self.last()
    }
}

/// Lenient parsing for list queries: missing values take defaults and out-of-bounds numbers are
/// clamped into range, but non-numeric input is still rejected.
pub fn parse_range(limit: Option<&str>, offset: Option<&str>) -> Result<IdRange, ValidationError> {
    let limit = match limit.map(str::trim) {
        None | Some("") => i64::from(DEFAULT_RANGE_LIMIT),
        Some(raw) => raw.parse::<i64>().map_err(|_| ValidationError::InvalidRange {
            reason: format!("limit '{raw}' is not a number"),
        })?,
    };
    let offset = match offset.map(str::trim) {
        None | Some("") => 0,
        Some(raw) => raw.parse::<i64>().map_err(|_| ValidationError::InvalidRange {
            reason: format!("offset '{raw}' is not a number"),
        })?,
    };

    let limit = limit.clamp(1, i64::from(MAX_RANGE_LIMIT)) as u32;
    let offset = offset.clamp(0, i64::from(MAX_ENTITY_ID - 1)) as u32;
    IdRange::new(offset, limit)
}

//! Error taxonomy for the mirror.
//!
//! - [`UpstreamError`]: the third-party catalog could not be read (transport failure, non-success
//!   status, undecodable body, timeout).
//! - [`StoreError`]: the local store rejected a read or write.
//! - [`ValidationError`]: malformed ids or ranges, rejected before any I/O.
//! - [`SyncError`]: what entity fetch and range sync return to the request layer.
//! - [`CounterError`]: the distributed counter backend failed. Rate-limit admission swallows these
//!   (fail-open) so they never reach a caller.
//! - [`ConfigError`]: malformed environment configuration at startup.
//!
//! Every type is `Clone`: a single in-flight upstream refresh is shared by all callers waiting on
//! the same id, and each of them receives its own copy of the outcome.

use crate::model::ReferenceKind;
use std::time::Duration;
use thiserror::Error;

/// Failure reading from the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Connection, TLS or protocol failure before a status was received.
    #[error("upstream transport error: {0}")]
    Transport(String),
    /// Upstream answered with a non-success status.
    #[error("upstream request failed: {status} ({url})")]
    Status { status: u16, url: String },
    /// Body could not be decoded into the expected payload.
    #[error("upstream payload could not be decoded: {0}")]
    Decode(String),
    /// The call exceeded the configured bound.
    #[error("upstream call timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

impl UpstreamError {
    /// Upstream reported the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// Failure of the local persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected write for entity {id}: {reason}")]
    Rejected { id: u32, reason: String },
}

/// Malformed input caught before any fetch is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid entity id '{raw}'")]
    InvalidId { raw: String },
    #[error("entity id {id} is outside 1..={max}")]
    IdOutOfRange { id: i64, max: u32 },
    #[error("invalid range: {reason}")]
    InvalidRange { reason: String },
    #[error("cannot seed {requested} entities at once (max {max})")]
    SeedCountTooLarge { requested: u32, max: u32 },
}

/// Outcome of entity fetch / range sync when something went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Upstream could not supply the entity; no stale copy is substituted unless configured.
    #[error("failed to fetch entity {id} from upstream: {source}")]
    UpstreamUnavailable {
        id: u32,
        #[source]
        source: UpstreamError,
    },
    /// Upstream could not list or describe a reference catalog.
    #[error("failed to fetch {kind} catalog from upstream: {source}")]
    CatalogUnavailable {
        kind: ReferenceKind,
        #[source]
        source: UpstreamError,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub(crate) fn upstream(id: u32, source: UpstreamError) -> Self {
        Self::UpstreamUnavailable { id, source }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. } | Self::CatalogUnavailable { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// True when upstream answered 404 for the requested id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { source, .. } if source.is_not_found())
    }
}

/// Failure of a counter backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterError {
    #[error("counter backend unreachable: {0}")]
    Connect(String),
    #[error("counter backend operation failed: {0}")]
    Backend(String),
}

/// Malformed configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid { key: String, value: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid { key: key.to_string(), value: value.to_string(), reason: reason.into() }
    }
}

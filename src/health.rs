//! Liveness and readiness probes over the local store.
//!
//! Both answer within a short fixed bound even if the store hangs. Readiness additionally
//! requires the category catalog to be seeded.

use crate::clock::Clock;
use crate::model::ReferenceKind;
use crate::store::CatalogStore;
use crate::timeout::TimeoutPolicy;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe result, serialized as the body of the health routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// `"connected"` or `"disconnected"`.
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    /// Seeded category count, reported when ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    healthy: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// 200 when healthy, 503 otherwise.
    pub fn http_status(&self) -> u16 {
        if self.healthy {
            200
        } else {
            503
        }
    }
}

#[derive(Clone)]
pub struct HealthProbe {
    store: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    timeout: TimeoutPolicy,
}

impl std::fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProbe").field("timeout", &self.timeout.duration()).finish()
    }
}

impl HealthProbe {
    pub fn new(store: Arc<dyn CatalogStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, timeout: TimeoutPolicy::new(PROBE_TIMEOUT) }
    }

    /// Replace the probe bound; anything below one millisecond is raised to it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = TimeoutPolicy::new(timeout.max(Duration::from_millis(1)));
        self
    }

    async fn store_reachable(&self) -> bool {
        match self.timeout.execute(self.store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(target: "catalog_mirror::health", error = %err, "store ping failed");
                false
            }
            Err(err) => {
                warn!(target: "catalog_mirror::health", error = %err, "store ping timed out");
                false
            }
        }
    }

    /// Is the store reachable?
    pub async fn liveness(&self) -> HealthReport {
        let connected = self.store_reachable().await;
        HealthReport {
            status: if connected { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: self.clock.now(),
            database: database_state(connected),
            ready: None,
            categories: None,
            message: (!connected).then(|| "Database connection failed".to_string()),
            healthy: connected,
        }
    }

    /// Is the store reachable and seeded with at least one category?
    pub async fn readiness(&self) -> HealthReport {
        let not_ready = |connected: bool, message: &str| HealthReport {
            status: "not ready".to_string(),
            timestamp: self.clock.now(),
            database: database_state(connected),
            ready: Some(false),
            categories: None,
            message: Some(message.to_string()),
            healthy: false,
        };

        if !self.store_reachable().await {
            return not_ready(false, "Database connection failed");
        }

        let count = self.timeout.execute(self.store.count_references(ReferenceKind::Category)).await;
        match count {
            Ok(Ok(0)) => not_ready(true, "Database not seeded"),
            Ok(Ok(categories)) => HealthReport {
                status: "ready".to_string(),
                timestamp: self.clock.now(),
                database: database_state(true),
                ready: Some(true),
                categories: Some(categories),
                message: None,
                healthy: true,
            },
            Ok(Err(err)) => {
                warn!(target: "catalog_mirror::health", error = %err, "category count failed");
                not_ready(true, "Readiness check failed")
            }
            Err(err) => {
                warn!(target: "catalog_mirror::health", error = %err, "category count timed out");
                not_ready(true, "Readiness check failed")
            }
        }
    }
}

fn database_state(connected: bool) -> String {
    let state = if connected { "connected" } else { "disconnected" };
    state.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::ReferenceEntity;
    use crate::store::MemoryCatalogStore;

    fn probe(store: &MemoryCatalogStore) -> HealthProbe {
        HealthProbe::new(Arc::new(store.clone()), Arc::new(ManualClock::new(0)))
    }

    #[tokio::test]
    async fn liveness_tracks_store_reachability() {
        let store = MemoryCatalogStore::new();
        let report = probe(&store).liveness().await;
        assert!(report.is_healthy());
        assert_eq!(report.database, "connected");

        store.set_offline(true);
        let report = probe(&store).liveness().await;
        assert_eq!(report.http_status(), 503);
        assert_eq!(report.status, "unhealthy");
        assert_eq!(report.database, "disconnected");
    }

    #[tokio::test]
    async fn readiness_requires_seeded_categories() {
        let store = MemoryCatalogStore::new();
        let report = probe(&store).readiness().await;
        assert!(!report.is_healthy());
        assert_eq!(report.message.as_deref(), Some("Database not seeded"));
        assert_eq!(report.ready, Some(false));

        store
            .upsert_references(vec![ReferenceEntity::named(ReferenceKind::Category, 1, "normal")])
            .await
            .unwrap();
        let report = probe(&store).readiness().await;
        assert!(report.is_healthy());
        assert_eq!(report.categories, Some(1));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["ready"], true);
        assert!(json.get("message").is_none());
        assert!(json.get("healthy").is_none());
    }

    #[tokio::test]
    async fn zero_timeout_is_raised_to_one_millisecond() {
        let store = MemoryCatalogStore::new();
        let probe = probe(&store).with_timeout(Duration::ZERO);
        assert_eq!(probe.timeout.duration(), Duration::from_millis(1));
        assert!(probe.liveness().await.is_healthy());
    }
}

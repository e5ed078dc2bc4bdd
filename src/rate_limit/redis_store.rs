//! Redis-backed counters shared by every server instance.

use super::store::{CounterStore, Hit};
use crate::error::CounterError;
use crate::timeout::TimeoutPolicy;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::sync::Arc;
use std::time::Duration;

/// Increment, then set the expiry only on the hit that created the key. A key left without an
/// expiry (PTTL < 0) is repaired so a counter can never live forever.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if current == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Arc<Script>,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Open a managed connection, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, CounterError> {
        let client = Client::open(url).map_err(|e| CounterError::Connect(e.to_string()))?;
        let conn = TimeoutPolicy::new(connect_timeout.max(Duration::from_millis(1)))
            .execute(ConnectionManager::new(client))
            .await
            .map_err(|e| CounterError::Connect(e.to_string()))?
            .map_err(|e| CounterError::Connect(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn, script: Arc::new(Script::new(INCREMENT_SCRIPT)) }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Hit, CounterError> {
        let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();
        let (total_hits, ttl_millis): (u64, i64) = self
            .script
            .key(key)
            .arg(window_millis)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;
        let ttl_remaining = u64::try_from(ttl_millis).ok().map(Duration::from_millis);
        Ok(Hit { total_hits, ttl_remaining })
    }

    async fn reset(&self, key: &str) -> Result<(), CounterError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(|e| CounterError::Backend(e.to_string()))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_sets_expiry_only_on_creation_or_repair() {
        assert!(INCREMENT_SCRIPT.contains("current == 1 or ttl < 0"));
        assert!(INCREMENT_SCRIPT.contains("PEXPIRE"));
    }

    #[tokio::test]
    async fn malformed_url_is_a_connect_error() {
        let err = RedisCounterStore::connect("not a url", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CounterError::Connect(_)));
    }
}

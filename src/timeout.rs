//! Fixed time bounds for infrastructure calls.
//!
//! Health probes and the counter backend handshake must answer quickly even when the thing they
//! talk to hangs; [`TimeoutPolicy`] wraps such calls in a tokio deadline.

use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out after {elapsed:?} (limit: {timeout:?})")]
pub struct TimedOut {
    pub elapsed: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy. Panics if duration is zero or `Duration::MAX`.
    pub fn new(duration: Duration) -> Self {
        assert!(
            duration > Duration::ZERO && duration < Duration::MAX,
            "timeout duration must be non-zero and finite",
        );
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Await `operation`, giving up once the bound elapses. The abandoned future is dropped.
    pub async fn execute<T, Fut>(&self, operation: Fut) -> Result<T, TimedOut>
    where
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        tokio::time::timeout(self.duration, operation)
            .await
            .map_err(|_| TimedOut { elapsed: start.elapsed(), timeout: self.duration })
    }
}

//! Bounded retry around versioned store commits
//!
//! Writers read current state, compute their change, and commit with expected
//! versions. A stale expectation re-runs the whole attempt; transient store
//! failures back off exponentially. Client errors surface immediately and are
//! never retried.

use crate::config::RetryConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics;
use crate::store::CommitError;

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a single optimistic attempt
#[derive(Debug)]
pub(crate) enum TxError {
    /// Expected version/epoch no longer matches; re-read and retry
    Stale,
    /// Transient store failure; retry with backoff
    Unavailable(String),
    /// Surfaced to the caller as-is, never retried
    Fatal(CoreError),
}

impl From<CoreError> for TxError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Unavailable(msg) => TxError::Unavailable(msg),
            other => TxError::Fatal(other),
        }
    }
}

impl From<CommitError> for TxError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::StaleVersion => TxError::Stale,
            CommitError::Unavailable(msg) => TxError::Unavailable(msg),
        }
    }
}

/// Retry bounds shared by every mutating operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Exponential backoff for transient failures: base * 2^(attempt-1), capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        }
    }
}

/// Run one optimistic transaction to completion under the policy
pub(crate) async fn run_tx<T, F, Fut>(policy: &RetryPolicy, op: &'static str, mut f: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TxError>>,
{
    let timer = metrics::op_timer(op);
    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        match f().await {
            Ok(value) => break Ok(value),
            Err(TxError::Fatal(e)) => break Err(e),
            Err(TxError::Stale) => {
                metrics::record_version_conflict(op);
                if attempt >= policy.max_attempts {
                    warn!(op, attempt, "giving up after repeated version conflicts");
                    break Err(CoreError::Conflict(
                        "record was modified concurrently; resubmit with fresh state".into(),
                    ));
                }
                debug!(op, attempt, "stale version, retrying");
            }
            Err(TxError::Unavailable(msg)) => {
                if attempt >= policy.max_attempts {
                    break Err(CoreError::Unavailable(msg));
                }
                let delay = policy.delay(attempt);
                warn!(op, attempt, delay_ms = delay.as_millis() as u64, error = %msg, "store unavailable, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    };
    timer.observe_duration();
    result
}

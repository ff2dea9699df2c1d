//! Bounded retry with exponential backoff at the store-access boundary

use crate::config::StorageConfig;
use crate::storage::traits::StorageResult;
use crate::RippleError;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently a failing store call is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn delay_for(&self, failures: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(failures.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Runs a store operation, retrying busy/locked failures with exponential backoff
///
/// Non-transient errors fail fast as [`RippleError::Storage`]. Running out of
/// attempts yields [`RippleError::StoreExhausted`].
///
/// # Arguments
/// * `policy` - Attempt count and initial backoff
/// * `what` - Short operation name used in log lines
/// * `op` - The store call; invoked once per attempt
pub async fn with_retry<T, F>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, RippleError>
where
    F: FnMut() -> StorageResult<T>,
{
    let mut failures = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(RippleError::Storage(e)),
            Err(e) => {
                failures += 1;
                if failures >= policy.attempts {
                    warn!("{} failed after {} attempts: {}", what, failures, e);
                    return Err(RippleError::StoreExhausted {
                        attempts: failures,
                        source: e,
                    });
                }

                let delay = policy.delay_for(failures);
                warn!(
                    "{} hit a transient store error, attempt {}/{}, retrying in {}ms: {}",
                    what,
                    failures,
                    policy.attempts,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

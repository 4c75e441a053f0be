use std::future::Future;
use std::time::Duration;

use rand::{Rng, rng};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::PlatformResult;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or
/// `max_attempts` is exhausted. Only [`crate::PlatformError::Transient`]
/// failures are retried.
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> PlatformResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PlatformResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                    return Err(err);
                }
                let backoff = backoff_with_jitter(policy, attempt);
                debug!(
                    operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying transient platform failure"
                );
                sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_with_jitter(policy: &RetryPolicy, attempt: u32) -> Duration {
    if policy.initial_backoff.is_zero() {
        return Duration::ZERO;
    }
    let capped_attempt = attempt.min(10);
    let initial_ms = policy.initial_backoff.as_millis().max(1) as u64;
    let multiplier = 1u64 << capped_attempt;
    let max_ms = policy.max_backoff.as_millis().max(1) as u64;
    let base_ms = initial_ms.saturating_mul(multiplier).min(max_ms);
    let jitter_ms = rng().random_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + jitter_ms)
}

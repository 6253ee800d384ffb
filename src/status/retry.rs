//! Bounded retry of optimistic-concurrency conflicts.
//!
//! Only `StoreError::Conflict` is retried. Every other error is returned on
//! the spot so the caller can decide (not-found is a no-op for the projector,
//! unavailable is surfaced to the reconcile loop).

use super::StoreError;
use std::time::Duration;

/// Upper bound on a single backoff sleep.
pub const MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
        }
    }
}

pub fn retry_on_conflict<T, F>(config: &RetryConfig, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;

    let mut attempt = 1;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                tracing::debug!(attempt, max_attempts, error = %e, "conflict, retrying");
                std::thread::sleep(delay.min(MAX_DELAY));
                delay = next_delay(delay, config.backoff_factor);
                attempt += 1;
            }
            Err(e) => {
                if e.is_conflict() {
                    tracing::warn!(attempt, max_attempts, error = %e, "giving up after conflicts");
                }
                return Err(e);
            }
        }
    }
}

fn next_delay(delay: Duration, factor: f64) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
        .map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
}

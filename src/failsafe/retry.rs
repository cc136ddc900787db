//! Retry logic with exponential backoff and jitter

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio::time::sleep;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Retry policy for one service
#[derive(Clone)]
pub struct RetryPolicy {
    /// Whether retries are enabled
    pub enabled: bool,
    /// Maximum total attempts (first try included)
    pub max_attempts: u32,
    /// Base backoff delay
    pub base_delay: Duration,
    /// Upper bound on a single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }

    /// Delay before the retry following attempt `attempt` (1-based):
    /// `base_delay * 2^(attempt-1)` plus uniform jitter in `[0, base_delay)`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));

        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..base_ms))
        };

        (exponential + jitter).min(self.max_delay)
    }
}

/// Execute a future with retry on transient failures.
///
/// Fatal errors abort on the first occurrence. Transient errors back off
/// exponentially and retry up to `max_attempts` total attempts; exhaustion
/// wraps the last transient error in [`Error::RetriesExhausted`].
///
/// Circuit breaker accounting is deliberately not done here - the caller
/// records one outcome per logical call, not one per attempt.
///
/// # Errors
///
/// Returns the first fatal error, or `RetriesExhausted` once all attempts
/// are consumed.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, service: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !policy.enabled {
        return f().await;
    }

    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_transient() {
                    debug!(service, attempt, error = %e, "Fatal error, not retrying");
                    return Err(e);
                }

                if attempt >= policy.max_attempts {
                    debug!(service, attempts = attempt, "Retry attempts exhausted");
                    return Err(Error::RetriesExhausted {
                        service: service.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }

                let delay = policy.backoff_delay(attempt);
                debug!(
                    service,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retrying after backoff"
                );
                sleep(delay).await;
            }
        }
    }
}

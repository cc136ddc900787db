//! Failsafe mechanisms: circuit breaker, retry, rate limiting, health tracking

mod circuit_breaker;
mod health;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use health::{HealthMonitor, HealthSnapshot, HealthStatus, Trend};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use retry::{RetryPolicy, with_retry};

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::ServiceConfig;

/// Combined failsafe state for one upstream service.
///
/// Owned exclusively by that service's integration client; nothing else
/// mutates it.
#[derive(Clone)]
pub struct Failsafe {
    /// Circuit breaker
    pub circuit_breaker: Arc<CircuitBreaker>,
    /// Per-subject rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Retry policy
    pub retry_policy: RetryPolicy,
    /// Health monitor
    pub health: Arc<HealthMonitor>,
}

impl Failsafe {
    /// Create a new failsafe from a service's configuration
    #[must_use]
    pub fn new(name: &str, config: &ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuit_breaker: Arc::new(CircuitBreaker::with_clock(
                name,
                &config.circuit_breaker,
                Arc::clone(&clock),
            )),
            rate_limiter: Arc::new(RateLimiter::with_clock(
                &config.rate_limit,
                Arc::clone(&clock),
            )),
            retry_policy: RetryPolicy::new(&config.retry),
            health: Arc::new(HealthMonitor::with_clock(name, &config.health, clock)),
        }
    }

    /// Record the final success of one logical call
    pub fn record_success(&self, latency: Duration) {
        self.circuit_breaker.on_success();
        self.health.record(true, latency);
    }

    /// Record the final failure of one logical call
    pub fn record_failure(&self, latency: Duration) {
        self.circuit_breaker.on_failure();
        self.health.record(false, latency);
    }
}

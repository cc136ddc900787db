//! Integration client: one resilient call path per upstream service
//!
//! Composes the TTL cache, per-subject rate limiter, circuit breaker, and
//! retry policy around a raw network operation. Callers hand in the
//! operation as an async closure; everything around it - admission,
//! backoff, outcome accounting - happens here, exactly once per logical
//! call no matter how many attempts run underneath.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::TtlCache;
use crate::clock::{Clock, system_clock};
use crate::config::{Config, ServiceConfig};
use crate::failsafe::{CircuitState, Failsafe, HealthStatus, Trend, with_retry};
use crate::{Error, Result};

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Cache key for read-through caching; `None` disables caching for this call
    pub cache_key: Option<String>,
    /// TTL override for the cached response; falls back to the service's
    /// configured TTL when `None`
    pub cache_ttl: Option<Duration>,
}

impl CallOptions {
    /// No caching, default everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-through cache under `key` with the service's configured TTL
    #[must_use]
    pub fn cached(key: impl Into<String>) -> Self {
        Self {
            cache_key: Some(key.into()),
            cache_ttl: None,
        }
    }

    /// Read-through cache under `key` with an explicit TTL
    #[must_use]
    pub fn cached_for(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache_key: Some(key.into()),
            cache_ttl: Some(ttl),
        }
    }
}

/// Health summary for one service, as served to the status surface
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    /// Service name
    pub service: String,
    /// Coarse status (down while the circuit is open)
    pub status: HealthStatus,
    /// Successes over total within the health window
    pub uptime_ratio: f64,
    /// Mean latency over the window, in milliseconds
    pub avg_latency_ms: u64,
    /// Uptime trend
    pub trend: Trend,
    /// Circuit breaker state
    pub circuit_state: String,
}

/// Resilient client for one upstream service
pub struct IntegrationClient {
    /// Service name
    service: String,
    /// Failsafe state (breaker, limiter, retry policy, health)
    failsafe: Failsafe,
    /// Shared response cache
    cache: Arc<TtlCache>,
    /// Per-attempt network timeout
    attempt_timeout: Duration,
    /// Whether response caching is enabled for this service
    cache_enabled: bool,
    /// Default TTL for cached responses
    cache_ttl: Duration,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IntegrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationClient")
            .field("service", &self.service)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("cache_enabled", &self.cache_enabled)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl IntegrationClient {
    /// Create a client for `service` on the system clock
    #[must_use]
    pub fn new(service: &str, config: &ServiceConfig, cache: Arc<TtlCache>) -> Self {
        Self::with_clock(service, config, cache, system_clock())
    }

    /// Create a client for `service` on the given clock
    #[must_use]
    pub fn with_clock(
        service: &str,
        config: &ServiceConfig,
        cache: Arc<TtlCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            service: service.to_string(),
            failsafe: Failsafe::new(service, config, Arc::clone(&clock)),
            cache,
            attempt_timeout: config.timeout,
            cache_enabled: config.cache.enabled,
            cache_ttl: config.cache.ttl,
            clock,
        }
    }

    /// Service name
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Execute one logical call against the upstream service.
    ///
    /// Order of checks: cache (hits are free - no quota, no circuit),
    /// rate limiter, circuit breaker, then the retry loop around the
    /// operation with a per-attempt timeout. The breaker and health monitor
    /// see exactly one outcome per logical call.
    ///
    /// Dropping the returned future (caller disconnect) cancels any pending
    /// backoff or in-flight attempt.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded`, `CircuitOpen`, a fatal upstream error,
    /// or `RetriesExhausted` wrapping the last transient failure.
    #[tracing::instrument(skip(self, options, operation), fields(service = %self.service, subject = %subject))]
    pub async fn call<F, Fut>(
        &self,
        subject: &str,
        options: CallOptions,
        mut operation: F,
    ) -> Result<Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        // 1. Cached responses short-circuit everything else
        let cache_key = options.cache_key.filter(|_| self.cache_enabled);
        if let Some(key) = &cache_key {
            if let Some(value) = self.cache.get(key) {
                tracing::debug!(key = %key, "Cache hit, skipping upstream call");
                return Ok(value);
            }
        }

        // 2. Rate limit per subject
        let decision = self.failsafe.rate_limiter.check(subject);
        if !decision.allowed {
            return Err(Error::RateLimitExceeded {
                service: self.service.clone(),
                retry_after: decision.retry_after,
            });
        }

        // 3. Circuit breaker admission
        self.failsafe.circuit_breaker.before_call()?;

        // 4. Retry loop with a per-attempt timeout
        let start = self.clock.now();
        let attempt_timeout = self.attempt_timeout;
        let service = self.service.clone();
        let result = with_retry(&self.failsafe.retry_policy, &self.service, || {
            let fut = operation();
            let service = service.clone();
            async move {
                match tokio::time::timeout(attempt_timeout, fut).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Timeout(service)),
                }
            }
        })
        .await;

        // 5/6. One outcome per logical call
        let latency = self.clock.now().duration_since(start);
        match result {
            Ok(value) => {
                info!(latency_ms = latency.as_millis(), "Call succeeded");
                self.failsafe.record_success(latency);

                if let Some(key) = &cache_key {
                    let ttl = options.cache_ttl.unwrap_or(self.cache_ttl);
                    if ttl > Duration::ZERO {
                        self.cache.set(key, value.clone(), ttl);
                    }
                }

                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, latency_ms = latency.as_millis(), "Call failed");
                self.failsafe.record_failure(latency);
                Err(e)
            }
        }
    }

    /// Health summary combining the sample window with the breaker state
    #[must_use]
    pub fn health(&self) -> ServiceHealth {
        let snapshot = self.failsafe.health.snapshot();
        let circuit_state = self.failsafe.circuit_breaker.state();

        // An open circuit is authoritative: the service is down for callers
        // regardless of what the sample window says.
        let status = if circuit_state == CircuitState::Open {
            HealthStatus::Down
        } else {
            snapshot.status
        };

        ServiceHealth {
            service: self.service.clone(),
            status,
            uptime_ratio: snapshot.uptime_ratio,
            avg_latency_ms: snapshot.avg_latency_ms,
            trend: snapshot.trend,
            circuit_state: circuit_state.to_string(),
        }
    }

    /// Access the failsafe state (used by tests and the status surface)
    #[must_use]
    pub fn failsafe(&self) -> &Failsafe {
        &self.failsafe
    }
}

/// Registry of integration clients, one per configured service
pub struct IntegrationRegistry {
    /// Clients by service name
    clients: DashMap<String, Arc<IntegrationClient>>,
    /// Shared response cache
    cache: Arc<TtlCache>,
}

impl IntegrationRegistry {
    /// Build clients for every enabled service in the configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let registry = Self::new();
        for (name, service_config) in config.enabled_services() {
            registry.register(name, service_config);
            info!(service = %name, "Registered integration client");
        }
        registry
    }

    /// Create an empty registry with a fresh shared cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            cache: Arc::new(TtlCache::new()),
        }
    }

    /// Register a client for `service`, replacing any existing one
    pub fn register(&self, service: &str, config: &ServiceConfig) {
        let client = Arc::new(IntegrationClient::new(
            service,
            config,
            Arc::clone(&self.cache),
        ));
        self.clients.insert(service.to_string(), client);
    }

    /// Look up the client for `service`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] for unknown services.
    pub fn get(&self, service: &str) -> Result<Arc<IntegrationClient>> {
        self.clients
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::ServiceNotFound(service.to_string()))
    }

    /// All registered clients
    #[must_use]
    pub fn all(&self) -> Vec<Arc<IntegrationClient>> {
        self.clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Health summaries for every registered service, sorted by name
    #[must_use]
    pub fn health_report(&self) -> Vec<ServiceHealth> {
        let mut report: Vec<ServiceHealth> =
            self.clients.iter().map(|entry| entry.value().health()).collect();
        report.sort_by(|a, b| a.service.cmp(&b.service));
        report
    }

    /// The shared response cache
    #[must_use]
    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }
}

impl Default for IntegrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

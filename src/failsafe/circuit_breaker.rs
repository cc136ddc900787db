//! Circuit breaker implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::clock::{Clock, system_clock};
use crate::config::CircuitBreakerConfig;
use crate::error::Error;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed (allowing requests)
    Closed,
    /// Circuit is open (blocking requests)
    Open,
    /// Circuit is half-open (one probe request allowed)
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Mutable breaker state. One lock per service; transitions settle under it
/// so a stale read can never transition a recovered circuit.
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for one upstream service
pub struct CircuitBreaker {
    /// Service name
    name: String,
    /// Configuration
    enabled: bool,
    failure_threshold: u32,
    reset_timeout: Duration,
    /// State
    inner: RwLock<BreakerInner>,
    /// Exclusive half-open probe gate. Set by the one caller admitted as the
    /// probe, cleared when its outcome is recorded.
    probe_in_flight: AtomicBool,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker on the system clock
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    /// Create a new circuit breaker on the given clock
    #[must_use]
    pub fn with_clock(name: &str, config: &CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            enabled: config.enabled,
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            probe_in_flight: AtomicBool::new(false),
            clock,
        }
    }

    /// Admission check before a network call.
    ///
    /// Closed circuits always permit. Open circuits reject until
    /// `reset_timeout` has elapsed, then transition to half-open and admit
    /// exactly one caller as the recovery probe; everyone else is rejected
    /// until that probe's outcome is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] when the call must not proceed.
    #[tracing::instrument(skip(self), fields(service = %self.name))]
    pub fn before_call(&self) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }

        let now = self.clock.now();

        // Fast path: closed circuits need no write lock
        if self.inner.read().state == CircuitState::Closed {
            tracing::trace!("Circuit closed, allowing request");
            return Ok(());
        }

        {
            let mut inner = self.inner.write();
            if inner.state == CircuitState::Open {
                let elapsed = inner
                    .opened_at
                    .map_or(Duration::ZERO, |at| now.duration_since(at));

                if elapsed < self.reset_timeout {
                    let retry_in = self.reset_timeout - elapsed;
                    warn!(retry_in_s = retry_in.as_secs(), "Circuit open, rejecting request");
                    return Err(Error::CircuitOpen {
                        service: self.name.clone(),
                        retry_in,
                    });
                }

                inner.state = CircuitState::HalfOpen;
                debug!("Circuit breaker half-open");
            }

            if inner.state == CircuitState::Closed {
                // Probe succeeded while we waited on the lock
                return Ok(());
            }
        }

        self.try_acquire_probe()
    }

    /// Compare-and-swap on the probe gate: exactly one caller wins
    fn try_acquire_probe(&self) -> Result<(), Error> {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(service = %self.name, "Admitting half-open probe request");
            Ok(())
        } else {
            debug!(service = %self.name, "Probe in flight, rejecting request");
            Err(Error::CircuitOpen {
                service: self.name.clone(),
                retry_in: Duration::ZERO,
            })
        }
    }

    /// Record the final success of a logical call
    #[tracing::instrument(skip(self), fields(service = %self.name))]
    pub fn on_success(&self) {
        if !self.enabled {
            return;
        }

        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                tracing::trace!("Success in closed state, reset failure count");
            }
            CircuitState::HalfOpen => {
                // One probe success is enough to close
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                drop(inner);
                self.probe_in_flight.store(false, Ordering::Release);
                info!("Circuit breaker closed");
            }
            CircuitState::Open => {
                tracing::trace!("Success recorded in open state (ignored)");
            }
        }
    }

    /// Record the final failure of a logical call
    #[tracing::instrument(skip(self), fields(service = %self.name))]
    pub fn on_failure(&self) {
        if !self.enabled {
            return;
        }

        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                let failures = inner.consecutive_failures;
                if failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(self.clock.now());
                    warn!(failures, "Circuit breaker opened");
                } else {
                    warn!(failures, threshold = self.failure_threshold, "Failure in closed state");
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed, reopen with a fresh cooldown
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                drop(inner);
                self.probe_in_flight.store(false, Ordering::Release);
                warn!("Probe failed in half-open state, reopening circuit");
            }
            CircuitState::Open => {
                tracing::trace!("Failure recorded in open state (ignored)");
            }
        }
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    /// Consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.read().consecutive_failures
    }

    /// Human-readable state line for status surfaces
    pub fn status_message(&self) -> String {
        let inner = self.inner.read();
        match inner.state {
            CircuitState::Closed => {
                format!("Service '{}' circuit breaker is closed", self.name)
            }
            CircuitState::Open => {
                let retry_in = inner.opened_at.map_or(Duration::ZERO, |at| {
                    self.reset_timeout
                        .saturating_sub(self.clock.now().duration_since(at))
                });
                format!(
                    "Service '{}' circuit breaker is open after {} failures, retry in {} seconds",
                    self.name,
                    inner.consecutive_failures,
                    retry_in.as_secs()
                )
            }
            CircuitState::HalfOpen => {
                format!(
                    "Service '{}' circuit breaker is half-open, testing recovery",
                    self.name
                )
            }
        }
    }
}

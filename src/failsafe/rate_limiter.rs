//! Fixed-window rate limiting, keyed by subject

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::clock::{Clock, system_clock};
use crate::config::RateLimitConfig;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Requests left in the current window (0 when rejected)
    pub remaining: u32,
    /// Time until the window resets
    pub retry_after: Duration,
}

/// One counting window for a subject
struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window rate limiter for one service, keyed by subject
/// (user id, API key, client IP - whatever the caller partitions by).
pub struct RateLimiter {
    /// Whether rate limiting is enabled
    enabled: bool,
    /// Requests admitted per subject per window
    limit: u32,
    /// Window duration
    window: Duration,
    /// Per-subject windows. The entry guard makes check-then-increment
    /// atomic per subject.
    windows: DashMap<String, Window>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter on the system clock
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a new rate limiter on the given clock
    #[must_use]
    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: config.enabled,
            limit: config.limit,
            window: config.window,
            windows: DashMap::new(),
            clock,
        }
    }

    /// Check and consume one slot for `subject`.
    ///
    /// A fresh or expired window restarts the count; within a window the
    /// first `limit` requests are admitted and the rest rejected until the
    /// window rolls over.
    pub fn check(&self, subject: &str) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision {
                allowed: true,
                remaining: self.limit,
                retry_after: Duration::ZERO,
            };
        }

        let now = self.clock.now();
        let mut window = self
            .windows
            .entry(subject.to_string())
            .or_insert_with(|| Window {
                started_at: now,
                count: 0,
            });

        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }

        if window.count < self.limit {
            window.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: self.limit - window.count,
                retry_after: self.window - now.duration_since(window.started_at),
            }
        } else {
            let retry_after = self.window - now.duration_since(window.started_at);
            tracing::debug!(
                subject,
                limit = self.limit,
                retry_after_s = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            }
        }
    }

    /// Drop windows that expired before `now`; keeps the map bounded by
    /// active subjects.
    pub fn prune_expired(&self) {
        let now = self.clock.now();
        self.windows
            .retain(|_, w| now.duration_since(w.started_at) < self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_config(limit: u32, window: Duration) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            limit,
            window,
        }
    }

    #[test]
    fn test_admits_up_to_limit() {
        let limiter = RateLimiter::new(&test_config(3, Duration::from_secs(60)));

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("user-1");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let rejected = limiter.check("user-1");
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.retry_after > Duration::ZERO);
    }

    #[test]
    fn test_window_resets_after_duration() {
        let clock = ManualClock::new();
        let limiter =
            RateLimiter::with_clock(&test_config(2, Duration::from_secs(60)), clock.clone());

        assert!(limiter.check("user-1").allowed);
        assert!(limiter.check("user-1").allowed);
        assert!(!limiter.check("user-1").allowed);

        clock.advance(Duration::from_secs(60));

        let decision = limiter.check("user-1");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_subjects_independent() {
        let limiter = RateLimiter::new(&test_config(1, Duration::from_secs(60)));

        assert!(limiter.check("user-1").allowed);
        assert!(!limiter.check("user-1").allowed);
        assert!(limiter.check("user-2").allowed);
    }

    #[test]
    fn test_retry_after_counts_down() {
        let clock = ManualClock::new();
        let limiter =
            RateLimiter::with_clock(&test_config(1, Duration::from_secs(60)), clock.clone());

        assert!(limiter.check("user-1").allowed);
        clock.advance(Duration::from_secs(40));

        let rejected = limiter.check("user-1");
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after, Duration::from_secs(20));
    }

    #[test]
    fn test_disabled_limiter_always_admits() {
        let config = RateLimitConfig {
            enabled: false,
            limit: 1,
            window: Duration::from_secs(60),
        };
        let limiter = RateLimiter::new(&config);

        for _ in 0..10 {
            assert!(limiter.check("user-1").allowed);
        }
    }

    #[test]
    fn test_no_over_admission_under_contention() {
        let limiter = Arc::new(RateLimiter::new(&test_config(50, Duration::from_secs(60))));

        let admitted: u32 = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = Arc::clone(&limiter);
                    s.spawn(move || {
                        (0..20).filter(|_| limiter.check("user-1").allowed).count() as u32
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_prune_expired() {
        let clock = ManualClock::new();
        let limiter =
            RateLimiter::with_clock(&test_config(5, Duration::from_secs(60)), clock.clone());

        limiter.check("user-1");
        limiter.check("user-2");

        clock.advance(Duration::from_secs(61));
        limiter.check("user-3");
        limiter.prune_expired();

        assert_eq!(limiter.windows.len(), 1);
    }
}

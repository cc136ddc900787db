//! Per-service health tracking
//!
//! Keeps a bounded rolling window of call outcomes and derives uptime ratio,
//! average latency, and a trend (improving/degrading/stable) by comparing
//! the newer half of the window against the older half.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::clock::{Clock, system_clock};
use crate::config::HealthConfig;

/// Minimum samples before a trend is computed
const MIN_TREND_SAMPLES: usize = 4;

/// Coarse service status derived from the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Healthy
    Up,
    /// Elevated failure rate
    Degraded,
    /// Mostly failing
    Down,
}

/// Uptime trend across the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Newer half meaningfully better than the older half
    Improving,
    /// Newer half meaningfully worse than the older half
    Degrading,
    /// No meaningful change (or not enough samples)
    Stable,
}

/// One recorded call outcome
struct Sample {
    at: Instant,
    success: bool,
    latency_ms: u64,
}

/// Health monitor for one upstream service
pub struct HealthMonitor {
    /// Service name
    name: String,
    /// Bounded sample window, oldest first
    samples: RwLock<VecDeque<Sample>>,
    /// Window capacity
    max_samples: usize,
    /// Uptime-ratio delta that flips the trend
    trend_delta: f64,
    /// Status thresholds
    degraded_below: f64,
    down_below: f64,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl HealthMonitor {
    /// Create a new health monitor on the system clock
    #[must_use]
    pub fn new(name: &str, config: &HealthConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    /// Create a new health monitor on the given clock
    #[must_use]
    pub fn with_clock(name: &str, config: &HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            samples: RwLock::new(VecDeque::with_capacity(config.max_samples)),
            max_samples: config.max_samples.max(1),
            trend_delta: config.trend_delta,
            degraded_below: config.degraded_below,
            down_below: config.down_below,
            clock,
        }
    }

    /// Record one call outcome. The oldest sample is dropped once the
    /// window is full.
    pub fn record(&self, success: bool, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;

        let mut samples = self.samples.write();
        if samples.len() >= self.max_samples {
            samples.pop_front();
        }
        samples.push_back(Sample {
            at: self.clock.now(),
            success,
            latency_ms,
        });
        drop(samples);

        if !success {
            debug!(service = %self.name, latency_ms, "Recorded failure sample");
        }
    }

    /// Current snapshot of derived metrics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> HealthSnapshot {
        let samples = self.samples.read();
        let total = samples.len();

        if total == 0 {
            return HealthSnapshot {
                service: self.name.clone(),
                status: HealthStatus::Up,
                uptime_ratio: 1.0,
                avg_latency_ms: 0,
                samples: 0,
                trend: Trend::Stable,
            };
        }

        let successes = samples.iter().filter(|s| s.success).count();
        let uptime_ratio = successes as f64 / total as f64;
        let avg_latency_ms =
            samples.iter().map(|s| s.latency_ms).sum::<u64>() / total as u64;

        let status = if uptime_ratio < self.down_below {
            HealthStatus::Down
        } else if uptime_ratio < self.degraded_below {
            HealthStatus::Degraded
        } else {
            HealthStatus::Up
        };

        HealthSnapshot {
            service: self.name.clone(),
            status,
            uptime_ratio,
            avg_latency_ms,
            samples: total,
            trend: Self::trend_of(&samples, self.trend_delta),
        }
    }

    /// Uptime trend: split the window into older/newer halves and compare
    /// uptime ratios against the configured delta.
    #[must_use]
    pub fn trend(&self) -> Trend {
        Self::trend_of(&self.samples.read(), self.trend_delta)
    }

    #[allow(clippy::cast_precision_loss)]
    fn trend_of(samples: &VecDeque<Sample>, delta: f64) -> Trend {
        let total = samples.len();
        if total < MIN_TREND_SAMPLES {
            return Trend::Stable;
        }

        let mid = total / 2;
        let ratio = |range: std::ops::Range<usize>| {
            let len = range.len();
            let ok = samples.range(range).filter(|s| s.success).count();
            ok as f64 / len as f64
        };

        let older = ratio(0..mid);
        let newer = ratio(mid..total);

        if newer - older > delta {
            Trend::Improving
        } else if older - newer > delta {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }

    /// Drop samples older than `max_age`
    pub fn prune_older_than(&self, max_age: Duration) {
        let now = self.clock.now();
        let mut samples = self.samples.write();
        while let Some(front) = samples.front() {
            if now.duration_since(front.at) > max_age {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Reset all samples
    pub fn reset(&self) {
        self.samples.write().clear();
    }
}

/// Snapshot of derived health metrics
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Service name
    pub service: String,
    /// Coarse status
    pub status: HealthStatus,
    /// Successes over total within the window (1.0 when empty)
    pub uptime_ratio: f64,
    /// Mean latency over the window, in milliseconds
    pub avg_latency_ms: u64,
    /// Number of samples in the window
    pub samples: usize,
    /// Uptime trend
    pub trend: Trend,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HealthConfig {
        HealthConfig {
            max_samples: 10,
            trend_delta: 0.1,
            degraded_below: 0.9,
            down_below: 0.5,
        }
    }

    #[test]
    fn test_uptime_ratio() {
        let monitor = HealthMonitor::new("media-server", &test_config());

        for _ in 0..8 {
            monitor.record(true, Duration::from_millis(50));
        }
        for _ in 0..2 {
            monitor.record(false, Duration::from_millis(200));
        }

        let snapshot = monitor.snapshot();
        assert!((snapshot.uptime_ratio - 0.8).abs() < f64::EPSILON);
        assert_eq!(snapshot.samples, 10);
    }

    #[test]
    fn test_avg_latency() {
        let monitor = HealthMonitor::new("media-server", &test_config());

        monitor.record(true, Duration::from_millis(50));
        monitor.record(true, Duration::from_millis(150));

        assert_eq!(monitor.snapshot().avg_latency_ms, 100);
    }

    #[test]
    fn test_empty_window_reports_up() {
        let monitor = HealthMonitor::new("media-server", &test_config());
        let snapshot = monitor.snapshot();

        assert_eq!(snapshot.status, HealthStatus::Up);
        assert!((snapshot.uptime_ratio - 1.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.trend, Trend::Stable);
    }

    #[test]
    fn test_status_thresholds() {
        let monitor = HealthMonitor::new("downloader", &test_config());

        // 4/5 = 0.8, between down (0.5) and degraded (0.9)
        for _ in 0..4 {
            monitor.record(true, Duration::from_millis(10));
        }
        monitor.record(false, Duration::from_millis(10));
        assert_eq!(monitor.snapshot().status, HealthStatus::Degraded);

        // Pile on failures until the ratio drops below 0.5
        for _ in 0..5 {
            monitor.record(false, Duration::from_millis(10));
        }
        assert_eq!(monitor.snapshot().status, HealthStatus::Down);
    }

    #[test]
    fn test_trend_degrading() {
        let monitor = HealthMonitor::new("request-broker", &test_config());

        // Older half all successes, newer half mostly failures
        for _ in 0..5 {
            monitor.record(true, Duration::from_millis(10));
        }
        for _ in 0..5 {
            monitor.record(false, Duration::from_millis(10));
        }

        assert_eq!(monitor.trend(), Trend::Degrading);
        assert_eq!(monitor.snapshot().trend, Trend::Degrading);
    }

    #[test]
    fn test_trend_improving() {
        let monitor = HealthMonitor::new("request-broker", &test_config());

        for _ in 0..5 {
            monitor.record(false, Duration::from_millis(10));
        }
        for _ in 0..5 {
            monitor.record(true, Duration::from_millis(10));
        }

        assert_eq!(monitor.trend(), Trend::Improving);
    }

    #[test]
    fn test_trend_stable_within_delta() {
        let monitor = HealthMonitor::new("uptime-monitor", &test_config());

        // 4/5 vs 5/5: delta 0.2 > 0.1 flips; use 9/10 vs 10/10 style instead
        for _ in 0..10 {
            monitor.record(true, Duration::from_millis(10));
        }
        assert_eq!(monitor.trend(), Trend::Stable);
    }

    #[test]
    fn test_trend_needs_minimum_samples() {
        let monitor = HealthMonitor::new("media-server", &test_config());

        monitor.record(true, Duration::from_millis(10));
        monitor.record(false, Duration::from_millis(10));

        assert_eq!(monitor.trend(), Trend::Stable);
    }

    #[test]
    fn test_window_is_bounded() {
        let monitor = HealthMonitor::new("media-server", &test_config());

        for _ in 0..25 {
            monitor.record(true, Duration::from_millis(10));
        }

        assert_eq!(monitor.snapshot().samples, 10);
    }

    #[test]
    fn test_old_failures_age_out() {
        let monitor = HealthMonitor::new("media-server", &test_config());

        // Window of 10: failures first, then enough successes to push them out
        for _ in 0..5 {
            monitor.record(false, Duration::from_millis(10));
        }
        for _ in 0..10 {
            monitor.record(true, Duration::from_millis(10));
        }

        let snapshot = monitor.snapshot();
        assert!((snapshot.uptime_ratio - 1.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.status, HealthStatus::Up);
    }

    #[test]
    fn test_prune_older_than() {
        let clock = crate::clock::ManualClock::new();
        let monitor = HealthMonitor::with_clock("media-server", &test_config(), clock.clone());

        monitor.record(false, Duration::from_millis(10));
        clock.advance(Duration::from_secs(3600));
        monitor.record(true, Duration::from_millis(10));

        monitor.prune_older_than(Duration::from_secs(1800));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.samples, 1);
        assert!((snapshot.uptime_ratio - 1.0).abs() < f64::EPSILON);
    }
}

//! Integration client tests - the full call pipeline
//!
//! Covers the admission order (cache, quota, circuit), once-per-call
//! breaker accounting across retries, and the health surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use integration_relay::client::{CallOptions, IntegrationClient, IntegrationRegistry};
use integration_relay::config::{
    CacheConfig, CircuitBreakerConfig, Config, RateLimitConfig, RetryConfig, ServiceConfig,
};
use integration_relay::error::Error;
use integration_relay::failsafe::{CircuitState, HealthStatus};
use integration_relay::cache::TtlCache;

fn service_config() -> ServiceConfig {
    ServiceConfig {
        timeout: Duration::from_secs(1),
        circuit_breaker: CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        },
        retry: RetryConfig {
            enabled: true,
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        },
        rate_limit: RateLimitConfig {
            enabled: true,
            limit: 10,
            window: Duration::from_secs(60),
        },
        cache: CacheConfig {
            enabled: true,
            ttl: Duration::from_secs(60),
        },
        ..ServiceConfig::default()
    }
}

fn client_with(config: ServiceConfig) -> IntegrationClient {
    IntegrationClient::new("media-server", &config, Arc::new(TtlCache::new()))
}

#[tokio::test]
async fn test_success_path_populates_cache() {
    let client = client_with(service_config());
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let result = client
        .call("user-1", CallOptions::cached("libraries"), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"sections": 3}))
            }
        })
        .await;

    assert_eq!(result.unwrap(), json!({"sections": 3}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Second call is served from cache: the operation never runs
    let counter = Arc::clone(&calls);
    let result = client
        .call("user-1", CallOptions::cached("libraries"), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"sections": 999}))
            }
        })
        .await;

    assert_eq!(result.unwrap(), json!({"sections": 3}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cached_responses_are_free() {
    let mut config = service_config();
    config.rate_limit.limit = 1;
    let client = client_with(config);

    // Consume the only slot while warming the cache
    let result = client
        .call("user-1", CallOptions::cached("status"), || async {
            Ok(json!({"ok": true}))
        })
        .await;
    assert!(result.is_ok());

    // Quota is gone, but cache hits don't need it
    for _ in 0..5 {
        let result = client
            .call("user-1", CallOptions::cached("status"), || async {
                Ok(json!({"ok": false}))
            })
            .await;
        assert_eq!(result.unwrap(), json!({"ok": true}));
    }

    // An uncached call from the same subject is rejected
    let err = client
        .call("user-1", CallOptions::new(), || async { Ok(json!(1)) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RateLimitExceeded { .. }));
}

#[tokio::test]
async fn test_rate_limit_rejection_is_immediate() {
    let mut config = service_config();
    config.rate_limit.limit = 2;
    let client = client_with(config);
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
        let counter = Arc::clone(&calls);
        let result = client
            .call("user-1", CallOptions::new(), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                }
            })
            .await;
        assert!(result.is_ok());
    }

    let counter = Arc::clone(&calls);
    let err = client
        .call("user-1", CallOptions::new(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            }
        })
        .await
        .unwrap_err();

    // No network attempt was made for the rejected call
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    match err {
        Error::RateLimitExceeded {
            service,
            retry_after,
        } => {
            assert_eq!(service, "media-server");
            assert!(retry_after > Duration::ZERO);
        }
        other => panic!("expected RateLimitExceeded, got {other}"),
    }

    // A different subject still gets through
    let result = client
        .call("user-2", CallOptions::new(), || async { Ok(json!(2)) })
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_circuit_opens_and_rejects_without_network() {
    let client = client_with(service_config());
    let calls = Arc::new(AtomicU32::new(0));

    // Two fatal failures open the circuit (threshold 2, fatal = no retries)
    for _ in 0..2 {
        let counter = Arc::clone(&calls);
        let err = client
            .call("user-1", CallOptions::new(), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::UpstreamStatus {
                        service: "media-server".to_string(),
                        status: 401,
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamStatus { .. }));
    }

    assert_eq!(
        client.failsafe().circuit_breaker.state(),
        CircuitState::Open
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Third call is rejected before the operation runs
    let counter = Arc::clone(&calls);
    let err = client
        .call("user-1", CallOptions::new(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_sees_one_outcome_across_retries() {
    let client = client_with(service_config());
    let calls = Arc::new(AtomicU32::new(0));

    // Transient failure on every attempt: 3 attempts, one logical failure
    let counter = Arc::clone(&calls);
    let err = client
        .call("user-1", CallOptions::new(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Transport("connection reset".to_string()))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(
        err,
        Error::RetriesExhausted { attempts: 3, .. }
    ));

    // One on_failure, not three: breaker is still below its threshold of 2
    assert_eq!(client.failsafe().circuit_breaker.consecutive_failures(), 1);
    assert_eq!(
        client.failsafe().circuit_breaker.state(),
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let client = client_with(service_config());
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let result = client
        .call("user-1", CallOptions::new(), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Error::Transport("connection reset".to_string()))
                } else {
                    Ok(json!({"attempt": n}))
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), json!({"attempt": 3}));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // The logical call succeeded: no failures recorded, one healthy sample
    assert_eq!(client.failsafe().circuit_breaker.consecutive_failures(), 0);
    let snapshot = client.failsafe().health.snapshot();
    assert_eq!(snapshot.samples, 1);
    assert!((snapshot.uptime_ratio - 1.0).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_classifies_transient() {
    let mut config = service_config();
    config.retry.max_attempts = 2;
    let client = client_with(config);
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let err = client
        .call("user-1", CallOptions::new(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Hangs well past the 1s attempt timeout
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }
        })
        .await
        .unwrap_err();

    // Timed out twice (transient), then exhausted
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    match err {
        Error::RetriesExhausted {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, Error::Timeout(_)));
        }
        other => panic!("expected RetriesExhausted, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_health_surface_reflects_open_circuit() {
    let client = client_with(service_config());

    for _ in 0..2 {
        let _ = client
            .call("user-1", CallOptions::new(), || async {
                Err(Error::UpstreamStatus {
                    service: "media-server".to_string(),
                    status: 500,
                })
            })
            .await;
    }

    let health = client.health();
    assert_eq!(health.service, "media-server");
    assert_eq!(health.status, HealthStatus::Down);
    assert_eq!(health.circuit_state, "open");
    assert!(health.uptime_ratio < f64::EPSILON);
}

#[tokio::test]
async fn test_registry_builds_all_default_services() {
    let config = Config::default();
    let registry = IntegrationRegistry::from_config(&config);

    assert_eq!(registry.all().len(), 4);
    for service in ["media-server", "request-broker", "downloader", "uptime-monitor"] {
        assert!(registry.get(service).is_ok(), "missing {service}");
    }

    let err = registry.get("imaginary").unwrap_err();
    assert!(matches!(err, Error::ServiceNotFound(_)));

    let report = registry.health_report();
    assert_eq!(report.len(), 4);
    // Sorted by service name for a stable dashboard ordering
    assert_eq!(report[0].service, "downloader");
    assert_eq!(report[3].service, "uptime-monitor");
}

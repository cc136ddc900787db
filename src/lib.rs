//! Integration Relay Library
//!
//! Resilient access layer for external media-stack services (media server,
//! request broker, download helper, uptime monitor).
//!
//! # Features
//!
//! - **Integration clients**: one resilient call path per upstream service
//! - **Failsafes**: circuit breakers, fixed-window rate limiting, retries
//!   with jittered backoff, per-attempt timeouts
//! - **Response caching**: shared TTL cache with lazy expiry
//! - **Webhook ingestion**: HMAC-SHA256 verification over raw bodies,
//!   dispatch onto an in-process event bus
//! - **Health surface**: per-service uptime ratio, latency, and trend

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod ingress;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}

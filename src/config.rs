//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Per-service integration configuration, keyed by service name
    pub services: HashMap<String, ServiceConfig>,
    /// Inbound webhook configuration
    pub webhooks: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            server: ServerConfig::default(),
            services: default_services(),
            webhooks: WebhookConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8750,
        }
    }
}

/// Per-service integration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Human-readable description
    pub description: String,
    /// Whether this service is enabled
    pub enabled: bool,
    /// Base URL of the upstream API
    pub base_url: String,
    /// HTTP headers sent with every request (API keys etc.)
    pub headers: HashMap<String, String>,
    /// Timeout for a single network attempt (distinct from retry backoff)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry configuration
    pub retry: RetryConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Response cache configuration
    pub cache: CacheConfig,
    /// Health tracking configuration
    pub health: HealthConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            description: String::new(),
            enabled: true,
            base_url: String::new(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(10),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    pub enabled: bool,
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time to wait before admitting a half-open probe
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries
    pub enabled: bool,
    /// Maximum total attempts (first try included)
    pub max_attempts: u32,
    /// Base backoff delay; attempt n waits `base_delay * 2^(n-1)` plus jitter
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on a single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Rate limiting configuration (fixed window, per subject)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Requests admitted per subject per window
    pub limit: u32,
    /// Window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching for this service
    pub enabled: bool,
    /// Default TTL for cached responses
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(30),
        }
    }
}

/// Health tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Maximum samples kept in the rolling window
    pub max_samples: usize,
    /// Uptime-ratio change between window halves that flips the trend
    pub trend_delta: f64,
    /// Uptime ratio below which the service reports degraded
    pub degraded_below: f64,
    /// Uptime ratio below which the service reports down
    pub down_below: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_samples: 500,
            trend_delta: 0.1,
            degraded_below: 0.9,
            down_below: 0.5,
        }
    }
}

/// Inbound webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Enable webhook ingestion
    pub enabled: bool,
    /// Path prefix for webhook endpoints
    pub base_path: String,
    /// Reject events from sources without a configured secret
    pub require_signature: bool,
    /// Per-source inbound request quota (requests per minute)
    pub rate_limit_per_minute: u32,
    /// Known webhook sources, keyed by service name
    pub sources: HashMap<String, WebhookSourceConfig>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        let sources = ["media-server", "request-broker", "downloader", "uptime-monitor"]
            .iter()
            .map(|name| ((*name).to_string(), WebhookSourceConfig::default()))
            .collect();

        Self {
            enabled: true,
            base_path: "/webhooks".to_string(),
            require_signature: true,
            rate_limit_per_minute: 60,
            sources,
        }
    }
}

/// Configuration for one webhook source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSourceConfig {
    /// Shared HMAC secret (supports `env:VAR_NAME` indirection)
    pub secret: String,
    /// Header carrying the signature (`sha256=<hex>` or bare hex)
    pub signature_header: String,
}

impl Default for WebhookSourceConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            signature_header: "X-Signature".to_string(),
        }
    }
}

impl WebhookSourceConfig {
    /// Resolve the shared secret, expanding `env:VAR_NAME` indirection.
    ///
    /// Returns `None` when no secret is configured or the referenced
    /// environment variable is unset.
    #[must_use]
    pub fn resolve_secret(&self) -> Option<String> {
        if self.secret.is_empty() {
            return None;
        }
        if let Some(var_name) = self.secret.strip_prefix("env:") {
            env::var(var_name).ok()
        } else {
            Some(self.secret.clone())
        }
    }
}

/// Default per-service configuration for the four mediated services.
///
/// The download helper gets a strict per-user hourly quota; the media server
/// a short, larger-quota window; the uptime monitor a small fast one.
fn default_services() -> HashMap<String, ServiceConfig> {
    let mut services = HashMap::new();

    services.insert(
        "media-server".to_string(),
        ServiceConfig {
            description: "Media server API".to_string(),
            timeout: Duration::from_secs(10),
            rate_limit: RateLimitConfig {
                enabled: true,
                limit: 120,
                window: Duration::from_secs(60),
            },
            cache: CacheConfig {
                enabled: true,
                ttl: Duration::from_secs(30),
            },
            ..ServiceConfig::default()
        },
    );

    services.insert(
        "request-broker".to_string(),
        ServiceConfig {
            description: "Request broker API".to_string(),
            circuit_breaker: CircuitBreakerConfig {
                reset_timeout: Duration::from_secs(45),
                ..CircuitBreakerConfig::default()
            },
            cache: CacheConfig {
                enabled: true,
                ttl: Duration::from_secs(60),
            },
            ..ServiceConfig::default()
        },
    );

    services.insert(
        "downloader".to_string(),
        ServiceConfig {
            description: "Video download helper".to_string(),
            timeout: Duration::from_secs(30),
            circuit_breaker: CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 3,
                reset_timeout: Duration::from_secs(120),
            },
            retry: RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_secs(1),
                ..RetryConfig::default()
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                limit: 10,
                window: Duration::from_secs(3600),
            },
            cache: CacheConfig {
                enabled: false,
                ttl: Duration::ZERO,
            },
            ..ServiceConfig::default()
        },
    );

    services.insert(
        "uptime-monitor".to_string(),
        ServiceConfig {
            description: "Uptime monitoring API".to_string(),
            timeout: Duration::from_secs(5),
            circuit_breaker: CircuitBreakerConfig {
                reset_timeout: Duration::from_secs(60),
                ..CircuitBreakerConfig::default()
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                limit: 30,
                window: Duration::from_secs(60),
            },
            cache: CacheConfig {
                enabled: true,
                ttl: Duration::from_secs(15),
            },
            ..ServiceConfig::default()
        },
    );

    services
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// The built-in per-service defaults are the base layer, so a config
    /// file overriding one field of one service keeps everything else.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (RELAY_ prefix)
        figment = figment.merge(Env::prefixed("RELAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before secret resolution)
        config.load_env_files();

        // Expand env:VAR references in service headers
        config.resolve_header_env_refs();

        Ok(config)
    }

    /// Replace `env:VAR_NAME` header values with the variable's content.
    /// Unset variables leave the reference untouched.
    fn resolve_header_env_refs(&mut self) {
        for service in self.services.values_mut() {
            for value in service.headers.values_mut() {
                if let Some(var_name) = value.strip_prefix("env:") {
                    if let Ok(resolved) = env::var(var_name) {
                        *value = resolved;
                    }
                }
            }
        }
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Get enabled services only
    pub fn enabled_services(&self) -> impl Iterator<Item = (&String, &ServiceConfig)> {
        self.services.iter().filter(|(_, s)| s.enabled)
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = duration.as_millis();
        if ms % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{ms}ms"))
        }
    }

    /// Deserialize human-readable duration strings ("100ms", "30s", "5m", "1h")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

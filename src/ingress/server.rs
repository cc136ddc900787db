//! Ingress HTTP server
//!
//! Hosts the two inbound surfaces: webhook ingestion (raw body read first,
//! signature verified before any JSON parsing) and the service health
//! endpoints consumed by the admin dashboard.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorLimiter};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::dispatch::{EventBus, WebhookEvent};
use super::verifier::WebhookVerifier;
use crate::client::IntegrationRegistry;
use crate::config::{Config, WebhookConfig};
use crate::{Error, Result};

/// Shared state for ingress handlers
pub struct AppState {
    /// Signature verifier
    verifier: WebhookVerifier,
    /// Event bus for accepted webhooks
    bus: Arc<EventBus>,
    /// Integration clients (health surface)
    registry: Arc<IntegrationRegistry>,
    /// Per-source inbound quota
    inbound_quota: DefaultKeyedRateLimiter<String>,
}

impl AppState {
    /// Build handler state from the webhook configuration
    #[must_use]
    pub fn new(
        webhooks: &WebhookConfig,
        registry: Arc<IntegrationRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        let rpm = NonZeroU32::new(webhooks.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            verifier: WebhookVerifier::new(webhooks),
            bus,
            registry,
            inbound_quota: GovernorLimiter::keyed(Quota::per_minute(rpm)),
        }
    }
}

/// Ingress server hosting webhook and health endpoints
pub struct IngressServer {
    config: Config,
    registry: Arc<IntegrationRegistry>,
    bus: Arc<EventBus>,
}

impl IngressServer {
    /// Create an ingress server
    #[must_use]
    pub fn new(config: Config, registry: Arc<IntegrationRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            registry,
            bus,
        }
    }

    /// Run the server until shutdown (ctrl-c or SIGTERM)
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let state = Arc::new(AppState::new(
            &self.config.webhooks,
            Arc::clone(&self.registry),
            Arc::clone(&self.bus),
        ));

        let app = create_router(state, &self.config.webhooks.base_path);

        let listener = TcpListener::bind(addr).await?;

        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(
            services = self.registry.all().len(),
            webhook_sources = self.config.webhooks.sources.len(),
            "Ingress ready"
        );
        if self.config.webhooks.enabled {
            for source in self.config.webhooks.sources.keys() {
                info!("  POST {}/{source}", self.config.webhooks.base_path);
            }
        }

        // Background maintenance: evict expired cache entries and drop
        // stale rate-limit windows.
        let registry = Arc::clone(&self.registry);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.cache().evict_expired();
                        for client in registry.all() {
                            client.failsafe().rate_limiter.prune_expired();
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Ingress shutdown complete");
        Ok(())
    }
}

/// Build the ingress router
#[must_use]
pub fn create_router(state: Arc<AppState>, base_path: &str) -> Router {
    Router::new()
        .route(&format!("{base_path}/{{source}}"), post(webhook_handler))
        .route("/health", get(health_report_handler))
        .route("/health/{service}", get(service_health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

/// Webhook ingestion handler.
///
/// The body arrives as raw bytes and signature verification runs on those
/// bytes before any JSON parsing.
async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    // Unknown sources 404 before any quota is consumed
    let source_config = match state.verifier.source(&source) {
        Ok(cfg) => cfg,
        Err(e) => {
            return (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() })));
        }
    };

    if state.inbound_quota.check_key(&source).is_err() {
        warn!(source = %source, "Inbound webhook quota exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate limit exceeded" })),
        );
    }

    let signature = headers
        .get(source_config.signature_header.as_str())
        .and_then(|v| v.to_str().ok());

    if let Err(e) = state.verifier.verify(&source, &body, signature) {
        warn!(source = %source, error = %e, "Webhook signature rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        );
    }

    // Signature checked out; only now is the payload parsed
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid JSON: {e}") })),
            );
        }
    };

    let event = WebhookEvent::new(&source, payload, body);
    let event_id = event.id;
    info!(
        source = %source,
        event_type = %event.event_type,
        event_id = %event_id,
        "Accepted webhook"
    );
    state.bus.publish(event);

    (
        StatusCode::OK,
        Json(json!({ "status": "accepted", "event_id": event_id })),
    )
}

/// Health report for all services
async fn health_report_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.health_report())
}

/// Health summary for one service
async fn service_health_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&service) {
        Ok(client) => (StatusCode::OK, Json(json!(client.health()))),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

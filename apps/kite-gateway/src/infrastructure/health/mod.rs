//! Health Check and Metrics Endpoints
//!
//! Health checks, session and subscription status, and Prometheus metrics
//! for the gateway. The listing service reuses the liveness and metrics
//! handlers.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::GatewayService;
use crate::domain::session::SessionSummary;
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Broker session.
    pub session: SessionStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Authenticated with the broker.
    Healthy,
    /// Serving, but no broker session yet.
    Degraded,
}

/// Broker session status.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Whether a session is installed.
    pub authenticated: bool,
    /// Session details, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionSummary>,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Registered classes and members.
    #[serde(flatten)]
    pub registry: SubscriptionStats,
    /// Live tick receivers.
    pub tick_receivers: usize,
}

// =============================================================================
// Health State
// =============================================================================

/// Shared state for the health routes.
pub struct HealthState {
    version: String,
    started_at: Instant,
    service: Arc<GatewayService>,
}

impl HealthState {
    /// Create health state.
    #[must_use]
    pub fn new(version: impl Into<String>, service: Arc<GatewayService>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            service,
        }
    }
}

/// Health, readiness, liveness and metrics routes.
pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(build_health_response(&state)))
}

/// Liveness probe.
pub async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// An unauthenticated gateway still serves /login and /callback.
async fn readiness_handler() -> impl IntoResponse {
    (StatusCode::OK, "READY")
}

/// Prometheus exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthState) -> HealthResponse {
    let user = state.service.session();
    let status = determine_health_status(user.is_some());

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        session: SessionStatus {
            authenticated: user.is_some(),
            user,
        },
        subscriptions: SubscriptionStatus {
            registry: state.service.subscription_stats(),
            tick_receivers: state.service.receiver_count(),
        },
    }
}

const fn determine_health_status(authenticated: bool) -> HealthStatus {
    if authenticated {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Tests
// =============================================================================

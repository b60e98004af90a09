//! Health check handlers
//!
//! Provides liveness, readiness and detailed health endpoints for monitoring
//! and orchestration.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use artguard_core::{DependencyHealth, OverallStatus};

use crate::handlers::AppState;

/// Liveness response
#[derive(Serialize, ToSchema)]
pub struct LiveResponse {
    #[schema(example = "alive")]
    pub status: &'static str,
}

/// Readiness response for Kubernetes
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    pub ready: bool,
    #[schema(value_type = String, example = "degraded")]
    pub status: OverallStatus,
}

/// Detailed health response
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `healthy`, `degraded` or `unhealthy`
    #[schema(value_type = String, example = "healthy")]
    pub status: OverallStatus,
    /// Server version from Cargo.toml
    pub version: &'static str,
    pub service: &'static str,
    /// Keyed by `processor`, `artworkStore` and `jobStore`
    #[schema(value_type = Object)]
    pub dependencies: BTreeMap<String, DependencyHealth>,
    pub checked_at: DateTime<Utc>,
}

fn status_code(ready: bool) -> StatusCode {
    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health/live - Kubernetes liveness probe
///
/// Succeeds whenever the process can answer; never touches a dependency.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is running", body = LiveResponse)
    )
)]
pub async fn live() -> Json<LiveResponse> {
    Json(LiveResponse { status: "alive" })
}

/// GET /health/ready - Kubernetes readiness probe
///
/// Not ready only when a critical store is down. A processor outage leaves
/// the gateway ready because lookups and duplicate checks still work.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready to accept traffic", body = ReadyResponse),
        (status = 503, description = "A critical dependency is down", body = ReadyResponse)
    )
)]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let report = state.health.check().await;
    let ready = report.is_ready();
    (
        status_code(ready),
        Json(ReadyResponse {
            ready,
            status: report.status,
        }),
    )
}

/// GET /health - Detailed health check
///
/// Per-dependency status, latency and processor breaker state.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Healthy or degraded", body = HealthResponse),
        (status = 503, description = "Unhealthy", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.health.check().await;
    (
        status_code(report.is_ready()),
        Json(HealthResponse {
            status: report.status,
            version: env!("CARGO_PKG_VERSION"),
            service: "artguard-server",
            dependencies: report.dependencies,
            checked_at: report.checked_at,
        }),
    )
}

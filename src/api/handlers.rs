use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub mode: String,
    pub dependencies: HealthDependencies,
    /// Generation of the most recently started dashboard refresh
    pub generation: u64,
    /// Unix milliseconds of the last published snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthDependencies {
    pub cache: String,
    pub cache_version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Health check passed", body = HealthResponse)
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    // Upstream and cache failures degrade to stale data, so the gateway
    // reports itself healthy as long as it is serving.
    let stats = state.cache.stats();
    let last_refresh = state.dashboard.snapshot().await.map(|s| s.refreshed_at);

    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        mode: "read-only".to_string(),
        dependencies: HealthDependencies {
            cache: stats.backend,
            cache_version: stats.version,
        },
        generation: state.dashboard.generation(),
        last_refresh,
    })
}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "system",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain")
    )
)]
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub instances: usize,
    pub running: usize,
}

/// GET /health -- service liveness plus instance counts.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let instances = state.manager.list().await;
    let running = instances.iter().filter(|i| i.is_running()).count();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instances: instances.len(),
        running,
    })
}

/// Mount health check routes (root level, not under `/api`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

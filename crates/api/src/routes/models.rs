use axum::routing::{get, post};
use axum::Router;

use crate::handlers::models;
use crate::state::AppState;

/// Routes mounted at `/models`.
///
/// ```text
/// POST   /                 -> deploy
/// GET    /                 -> list_instances
/// GET    /available        -> list_available
/// GET    /{id}             -> get_instance
/// DELETE /{id}             -> remove_instance
/// POST   /{id}/stop        -> stop_instance
/// GET    /{id}/logs        -> get_logs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(models::deploy).get(models::list_instances))
        .route("/available", get(models::list_available))
        .route(
            "/{id}",
            get(models::get_instance).delete(models::remove_instance),
        )
        .route("/{id}/stop", post(models::stop_instance))
        .route("/{id}/logs", get(models::get_logs))
}

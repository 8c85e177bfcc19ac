pub mod chat;
pub mod embeddings;
pub mod health;
pub mod models;
pub mod playground;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// ```text
/// /models                          deploy (POST), list (GET, ?kind=)
/// /models/available                RUNNING instances (?kind=)
/// /models/{id}                     get, remove (DELETE)
/// /models/{id}/stop                stop (POST)
/// /models/{id}/logs                tail logs (?lines=N)
///
/// /chat/{id}/generate              single completion (POST)
/// /chat/{id}/stream                server-sent events (POST)
///
/// /embeddings/{id}                 encode text (POST)
///
/// /playground/validate             preflight a workflow (POST)
/// /playground/order                execution layers (POST)
/// /playground/execute              run a workflow (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/models", models::router())
        .nest("/chat", chat::router())
        .nest("/embeddings", embeddings::router())
        .nest("/playground", playground::router())
}

use axum::routing::post;
use axum::Router;

use crate::handlers::embeddings;
use crate::state::AppState;

/// Routes mounted at `/embeddings`.
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", post(embeddings::encode))
}

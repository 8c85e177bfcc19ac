use axum::routing::post;
use axum::Router;

use crate::handlers::chat;
use crate::state::AppState;

/// Routes mounted at `/chat`.
///
/// ```text
/// POST /{id}/generate      -> generate
/// POST /{id}/stream        -> stream_generate
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/generate", post(chat::generate))
        .route("/{id}/stream", post(chat::stream_generate))
}

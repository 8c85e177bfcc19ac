use axum::routing::post;
use axum::Router;

use crate::handlers::playground;
use crate::state::AppState;

/// Routes mounted at `/playground`.
///
/// ```text
/// POST /validate           -> validate
/// POST /order              -> execution_order
/// POST /execute            -> execute
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/validate", post(playground::validate))
        .route("/order", post(playground::execution_order))
        .route("/execute", post(playground::execute))
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use llmops_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::ResourceLimit(msg) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "RESOURCE_LIMIT",
                    msg.clone(),
                ),
                CoreError::InvalidState { .. } => {
                    (StatusCode::CONFLICT, "INVALID_STATE", core.to_string())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Inference(msg) => {
                    tracing::warn!(error = %msg, "Inference failed");
                    (StatusCode::BAD_GATEWAY, "INFERENCE_ERROR", msg.clone())
                }
                CoreError::Process(msg) => {
                    tracing::error!(error = %msg, "Process error");
                    (StatusCode::INTERNAL_SERVER_ERROR, "PROCESS_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use llmops_core::instance::InstanceStatus;

    use super::*;

    fn status_of(err: CoreError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn core_errors_map_to_http_statuses() {
        assert_eq!(status_of(CoreError::instance_not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(CoreError::ResourceLimit("full".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(CoreError::InvalidState {
                id: "x".into(),
                status: InstanceStatus::Stopped
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(CoreError::Validation("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(CoreError::Inference("boom".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_of(CoreError::Internal("oops".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

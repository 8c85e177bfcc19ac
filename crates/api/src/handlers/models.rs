//! Handlers for model instance lifecycle endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use llmops_core::error::CoreError;
use llmops_core::instance::{DeployRequest, Instance};
use llmops_core::model_kind::ModelKind;
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Lines returned by the logs endpoint when `lines` is omitted.
const DEFAULT_LOG_LINES: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct KindQuery {
    pub kind: Option<ModelKind>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Trailing lines to return; `0` or negative returns the whole buffer.
    pub lines: Option<i64>,
}

/// POST /models
///
/// Register a deployment and start it in the background. The returned
/// instance is usually still INITIALIZING; poll `GET /models/{id}`.
pub async fn deploy(
    State(state): State<AppState>,
    Json(input): Json<DeployRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<Instance>>)> {
    let instance = state.manager.deploy(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: instance })))
}

/// GET /models
pub async fn list_instances(
    State(state): State<AppState>,
    Query(query): Query<KindQuery>,
) -> Json<DataResponse<Vec<Instance>>> {
    let data = match query.kind {
        Some(kind) => state.manager.list_by_kind(kind).await,
        None => state.manager.list().await,
    };
    Json(DataResponse { data })
}

/// GET /models/available
///
/// RUNNING instances, for the workflow builder's model picker.
pub async fn list_available(
    State(state): State<AppState>,
    Query(query): Query<KindQuery>,
) -> Json<DataResponse<Vec<Instance>>> {
    Json(DataResponse {
        data: state.manager.available(query.kind).await,
    })
}

/// GET /models/{id}
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Instance>>> {
    let instance = state
        .manager
        .get(&id)
        .await
        .ok_or_else(|| CoreError::instance_not_found(&id))?;
    Ok(Json(DataResponse { data: instance }))
}

/// POST /models/{id}/stop
pub async fn stop_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Instance>>> {
    let instance = state.manager.stop(&id).await?;
    Ok(Json(DataResponse { data: instance }))
}

/// DELETE /models/{id}
pub async fn remove_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.manager.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /models/{id}/logs?lines=N
pub async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<DataResponse<Vec<String>>>> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    let logs = state.manager.tail_logs(&id, lines).await?;
    Ok(Json(DataResponse { data: logs }))
}

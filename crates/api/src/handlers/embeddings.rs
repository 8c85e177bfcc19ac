use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EncodeRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub instance_id: String,
    pub dimensions: usize,
    pub embedding: Vec<f32>,
}

/// POST /embeddings/{id}
pub async fn encode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<EncodeRequest>,
) -> AppResult<Json<DataResponse<EmbeddingResponse>>> {
    if input.text.is_empty() {
        return Err(AppError::BadRequest("text must not be empty".to_string()));
    }
    let embedding = state.manager.encode(&id, &input.text).await?;
    Ok(Json(DataResponse {
        data: EmbeddingResponse {
            instance_id: id,
            dimensions: embedding.len(),
            embedding,
        },
    }))
}

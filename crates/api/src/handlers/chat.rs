//! Text generation against a RUNNING chat instance.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{stream, Stream, StreamExt};
use llmops_runtime::GenerationParams;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub instance_id: String,
    pub text: String,
}

fn require_prompt(input: &ChatRequest) -> AppResult<()> {
    if input.prompt.trim().is_empty() {
        return Err(AppError::BadRequest("prompt must not be empty".to_string()));
    }
    Ok(())
}

/// POST /chat/{id}/generate
pub async fn generate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ChatRequest>,
) -> AppResult<Json<DataResponse<ChatResponse>>> {
    require_prompt(&input)?;
    let text = state.manager.generate(&id, &input.prompt, input.params).await?;
    Ok(Json(DataResponse {
        data: ChatResponse {
            instance_id: id,
            text,
        },
    }))
}

/// POST /chat/{id}/stream
///
/// One `message` event per chunk, an `error` event if the backend fails
/// mid-stream, then a final `done` event.
pub async fn stream_generate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ChatRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require_prompt(&input)?;
    let chunks = state
        .manager
        .generate_stream(&id, &input.prompt, input.params)
        .await?;

    let events = chunks
        .map(move |chunk| {
            let event = match chunk {
                Ok(text) => Event::default().data(text),
                Err(e) => {
                    tracing::warn!(instance_id = %id, error = %e, "Stream failed");
                    Event::default().event("error").data(e.to_string())
                }
            };
            Ok::<_, Infallible>(event)
        })
        .chain(stream::once(async {
            Ok(Event::default().event("done").data("[DONE]"))
        }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

//! HTTP client for OpenAI-compatible model servers (vLLM and friends).
//!
//! The spawned server owns the weights, so `load` and `unload` are no-ops
//! here; the process supervisor handles the server's lifetime.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::backend::{BackendError, GenerationParams, InferenceBackend, TextStream};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    base_url: String,
    /// Model name the server was launched with (`--model`).
    model: String,
}

impl OpenAiCompatBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Response(format!("{status} from {url}: {text}")));
        }
        Ok(response)
    }

    fn completion_body(&self, prompt: &str, params: GenerationParams, stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "stream": stream,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

fn first_choice_text(response: CompletionResponse) -> Result<String, BackendError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.text)
        .ok_or_else(|| BackendError::Response("completion has no choices".to_string()))
}

#[async_trait]
impl InferenceBackend for OpenAiCompatBackend {
    async fn load(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<String, BackendError> {
        let response = self
            .post("/v1/completions", self.completion_body(prompt, params, false))
            .await?;
        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Response(e.to_string()))?;
        first_choice_text(body)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<TextStream, BackendError> {
        let response = self
            .post("/v1/completions", self.completion_body(prompt, params, true))
            .await?;
        Ok(sse_text_stream(response.bytes_stream()))
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let response = self
            .post("/v1/embeddings", json!({ "model": self.model, "input": text }))
            .await?;
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Response(e.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BackendError::Response("embedding response has no data".to_string()))
    }

    async fn unload(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// Splits a byte stream into complete lines and extracts `data:` payloads.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

enum SseChunk {
    Text(String),
    Done,
}

fn parse_sse_payload(payload: &str) -> Result<SseChunk, BackendError> {
    if payload == "[DONE]" {
        return Ok(SseChunk::Done);
    }
    let body: CompletionResponse =
        serde_json::from_str(payload).map_err(|e| BackendError::Response(e.to_string()))?;
    Ok(SseChunk::Text(first_choice_text(body)?))
}

struct SseState<S> {
    inner: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, BackendError>>,
    done: bool,
}

/// Turn a completion event stream into text chunks, ending at `[DONE]` or
/// at the end of the body, whichever comes first.
fn sse_text_stream<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        inner: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => {
                    for payload in st.decoder.push(bytes.as_ref()) {
                        match parse_sse_payload(&payload) {
                            Ok(SseChunk::Text(text)) if text.is_empty() => {}
                            Ok(SseChunk::Text(text)) => st.pending.push_back(Ok(text)),
                            Ok(SseChunk::Done) => {
                                st.done = true;
                                break;
                            }
                            Err(e) => {
                                st.pending.push_back(Err(e));
                                st.done = true;
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    st.pending.push_back(Err(BackendError::Request(e.to_string())));
                }
                None => st.done = true,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> String {
        format!("data: {}\n\n", json!({ "choices": [{ "text": text }] }))
    }

    async fn collect(parts: Vec<String>) -> Vec<Result<String, BackendError>> {
        let bytes = futures::stream::iter(
            parts.into_iter().map(|p| Ok::<_, std::io::Error>(p.into_bytes())),
        );
        sse_text_stream(bytes).collect().await
    }

    #[test]
    fn decoder_handles_lines_split_across_chunks() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"a\"").is_empty());
        assert_eq!(d.push(b":1}\r\n\n: comment\n"), vec!["{\"a\":1}".to_string()]);
    }

    #[tokio::test]
    async fn stream_stops_at_done_marker() {
        let chunks = collect(vec![
            event("Hello"),
            event(""),
            event(", world"),
            "data: [DONE]\n\n".to_string(),
            event("ignored"),
        ])
        .await;
        let texts: Vec<String> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, ["Hello", ", world"]);
    }

    #[tokio::test]
    async fn malformed_payload_ends_stream_with_error() {
        let chunks = collect(vec![event("a"), "data: not json\n".to_string(), event("b")]).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_err());
    }

    #[tokio::test]
    async fn body_without_done_marker_still_terminates() {
        let chunks = collect(vec![event("only")]).await;
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = OpenAiCompatBackend::new("http://127.0.0.1:8000/", "gpt2");
        assert_eq!(backend.base_url(), "http://127.0.0.1:8000");
    }
}

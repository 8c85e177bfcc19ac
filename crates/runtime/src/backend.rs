//! The inference backend seam every instance delegates computation to.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use llmops_core::error::CoreError;
use serde::{Deserialize, Serialize};

/// Lazy, finite, non-restartable sequence of generated text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Sampling controls for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    100
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Unexpected backend response: {0}")]
    Response(String),

    #[error("Backend does not support {0}")]
    Unsupported(&'static str),

    #[error("Backend operation cancelled")]
    Cancelled,

    #[error("Model error: {0}")]
    Model(String),

    /// The backend can no longer serve; the instance moves to ERROR.
    #[error("Backend failed permanently: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Request(err.to_string())
    }
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        CoreError::Inference(err.to_string())
    }
}

/// Load/generate/encode capability behind one instance.
///
/// `load` may take minutes and must not block the scheduler; implementations
/// that wrap synchronous code offload to the blocking pool.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn load(&self) -> Result<(), BackendError>;

    async fn generate(&self, prompt: &str, params: GenerationParams)
        -> Result<String, BackendError>;

    /// Defaults to a single chunk holding the full generation.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<TextStream, BackendError> {
        let text = self.generate(prompt, params).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    async fn encode(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Err(BackendError::Unsupported("encode"))
    }

    async fn unload(&self) -> Result<(), BackendError>;
}

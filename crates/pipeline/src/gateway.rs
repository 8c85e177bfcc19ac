//! The executor's only view of the instance manager.

use async_trait::async_trait;
use llmops_core::error::CoreResult;
use llmops_core::instance::Instance;
use llmops_runtime::{GenerationParams, InstanceManager};

/// Read-only instance lookup plus text generation.
///
/// The executor never changes instance state; it only checks status and
/// asks for completions.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn instance(&self, id: &str) -> Option<Instance>;

    async fn generate(&self, id: &str, prompt: &str, params: GenerationParams)
        -> CoreResult<String>;
}

#[async_trait]
impl ModelGateway for InstanceManager {
    async fn instance(&self, id: &str) -> Option<Instance> {
        self.get(id).await
    }

    async fn generate(
        &self,
        id: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> CoreResult<String> {
        InstanceManager::generate(self, id, prompt, params).await
    }
}

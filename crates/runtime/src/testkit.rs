//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests in this and downstream crates).
//!
//! - [`ScriptedBackend`]: in-process backend with scripted load and
//!   generation behaviour that records every prompt it sees.
//! - [`scripted_provider`]: provider handing the same scripted backend to
//!   every deploy.
//! - [`ShellProvider`]: provider launching `/bin/sh -c <script>` with a
//!   `READY` / `FATAL` marker probe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llmops_core::error::CoreResult;
use llmops_core::instance::{DeployRequest, Instance, InstanceStatus};
use llmops_core::model_kind::ModelKind;
use llmops_core::readiness::MarkerProbe;
use parking_lot::Mutex;

use crate::backend::{BackendError, GenerationParams, InferenceBackend, TextStream};
use crate::config::ManagerConfig;
use crate::manager::InstanceManager;
use crate::process::ProcessCommand;
use crate::provider::{BackendProvider, InProcessProvider, Launch, LaunchTarget};

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

pub struct ScriptedBackend {
    load_delay: Duration,
    load_error: Option<String>,
    fail_on: Vec<String>,
    fatal_on: Vec<String>,
    responder: Responder,
    embedding: Vec<f32>,
    prompts: Mutex<Vec<String>>,
    loads: AtomicUsize,
    unloads: AtomicUsize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            load_delay: Duration::ZERO,
            load_error: None,
            fail_on: Vec::new(),
            fatal_on: Vec::new(),
            responder: Box::new(|prompt| format!("out:{prompt}")),
            embedding: vec![0.1, 0.2, 0.3],
            prompts: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
        }
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn failing_load(mut self, message: impl Into<String>) -> Self {
        self.load_error = Some(message.into());
        self
    }

    /// Generation fails for prompts containing `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on.push(needle.into());
        self
    }

    /// Generation fails fatally for prompts containing `needle`.
    pub fn fatal_on(mut self, needle: impl Into<String>) -> Self {
        self.fatal_on.push(needle.into());
        self
    }

    pub fn responding<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.responder = Box::new(f);
        self
    }

    /// Every prompt passed to `generate`/`generate_stream`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }

    fn respond(&self, prompt: &str) -> Result<String, BackendError> {
        self.prompts.lock().push(prompt.to_string());
        if self.fatal_on.iter().any(|n| prompt.contains(n.as_str())) {
            return Err(BackendError::Fatal(format!("scripted fatal error for {prompt:?}")));
        }
        if self.fail_on.iter().any(|n| prompt.contains(n.as_str())) {
            return Err(BackendError::Model(format!("scripted failure for {prompt:?}")));
        }
        Ok((self.responder)(prompt))
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn load(&self) -> Result<(), BackendError> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        match &self.load_error {
            Some(msg) => Err(BackendError::Model(msg.clone())),
            None => Ok(()),
        }
    }

    async fn generate(&self, prompt: &str, _params: GenerationParams) -> Result<String, BackendError> {
        self.respond(prompt)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _params: GenerationParams,
    ) -> Result<TextStream, BackendError> {
        let text = self.respond(prompt)?;
        let chunks: Vec<Result<String, BackendError>> = text
            .split_inclusive(' ')
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn encode(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(self.embedding.clone())
    }

    async fn unload(&self) -> Result<(), BackendError> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands `backend` to every deploy.
pub fn scripted_provider(backend: Arc<ScriptedBackend>) -> InProcessProvider {
    InProcessProvider::new(move |_target| {
        let backend: Arc<dyn InferenceBackend> = backend.clone();
        Ok(backend)
    })
}

/// Launches `/bin/sh -c <script>` with `$PORT` set. Lines containing
/// `READY` mark the instance ready; lines containing `FATAL` are fatal.
pub struct ShellProvider {
    script: String,
    client: Arc<ScriptedBackend>,
}

impl ShellProvider {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            client: Arc::new(ScriptedBackend::new()),
        }
    }
}

impl BackendProvider for ShellProvider {
    fn needs_port(&self, _request: &DeployRequest, _kind: ModelKind) -> bool {
        true
    }

    fn prepare(&self, target: &LaunchTarget<'_>) -> CoreResult<Launch> {
        let command = ProcessCommand::new("/bin/sh")
            .args(["-c", self.script.as_str()])
            .env("PORT", target.port.unwrap_or_default().to_string());
        let readiness = MarkerProbe::new(["READY"], Some("FATAL"))
            .map_err(|e| llmops_core::CoreError::Internal(e.to_string()))?;
        Ok(Launch::Process {
            command,
            readiness: Arc::new(readiness),
            client: self.client.clone(),
        })
    }
}

/// Manager config with short grace periods.
pub fn fast_config() -> ManagerConfig {
    ManagerConfig {
        stop_grace: Duration::from_millis(300),
        kill_grace: Duration::from_secs(2),
        readiness_timeout: Duration::from_secs(30),
        ..ManagerConfig::default()
    }
}

/// Poll until `id` reaches `status`. Panics after `timeout`.
pub async fn wait_for_status(
    manager: &InstanceManager,
    id: &str,
    status: InstanceStatus,
    timeout: Duration,
) -> Instance {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(instance) = manager.get(id).await {
            if instance.status == status {
                return instance;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            let current = manager.get(id).await.map(|i| i.status);
            panic!("{id} did not reach {status} within {timeout:?} (currently {current:?})");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

//! Backend providers decide how a deploy request becomes a running backend.
//!
//! A provider is consulted once per deploy. It reports whether the instance
//! needs a port and then produces a [`Launch`] plan: either a subprocess to
//! supervise (with a readiness probe and a client to talk to it) or an
//! in-process backend to load.

use std::fmt;
use std::sync::Arc;

use llmops_core::error::{CoreError, CoreResult};
use llmops_core::instance::DeployRequest;
use llmops_core::model_kind::ModelKind;
use llmops_core::readiness::{MarkerProbe, ReadinessProbe};
use serde_json::Value;

use crate::backend::InferenceBackend;
use crate::config::VllmConfig;
use crate::openai::OpenAiCompatBackend;
use crate::process::ProcessCommand;

/// Default `--max-model-len` when the request does not set one.
const DEFAULT_MAX_MODEL_LEN: u64 = 4096;

/// Everything a provider may look at when planning a launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchTarget<'a> {
    pub instance_id: &'a str,
    pub request: &'a DeployRequest,
    pub kind: ModelKind,
    pub port: Option<u16>,
}

pub enum Launch {
    /// Spawn and supervise a model server; `client` talks to it once ready.
    Process {
        command: ProcessCommand,
        readiness: Arc<dyn ReadinessProbe>,
        client: Arc<dyn InferenceBackend>,
    },
    /// Load weights inside this process.
    InProcess { backend: Arc<dyn InferenceBackend> },
}

impl fmt::Debug for Launch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process { command, .. } => f
                .debug_struct("Process")
                .field("command", &command.display())
                .finish_non_exhaustive(),
            Self::InProcess { .. } => f.debug_struct("InProcess").finish_non_exhaustive(),
        }
    }
}

pub trait BackendProvider: Send + Sync {
    fn needs_port(&self, request: &DeployRequest, kind: ModelKind) -> bool;

    /// Build the launch plan. Errors here fail the deploy synchronously.
    fn prepare(&self, target: &LaunchTarget<'_>) -> CoreResult<Launch>;
}

// ---------------------------------------------------------------------------
// vLLM
// ---------------------------------------------------------------------------

/// Launches `vllm.entrypoints.openai.api_server` per instance.
#[derive(Debug, Clone, Default)]
pub struct VllmProvider {
    config: VllmConfig,
}

impl VllmProvider {
    pub fn new(config: VllmConfig) -> Self {
        Self { config }
    }

    pub fn command(&self, request: &DeployRequest, kind: ModelKind, port: u16) -> ProcessCommand {
        let params = &request.parameters;
        let mut cmd = ProcessCommand::new(&self.config.python).args([
            "-m".to_string(),
            "vllm.entrypoints.openai.api_server".to_string(),
            "--model".to_string(),
            request.served_model().to_string(),
            "--port".to_string(),
            port.to_string(),
            "--host".to_string(),
            self.config.host.clone(),
        ]);

        if self.config.gpu_enabled() {
            if let Some(dtype) = params.get("dtype").and_then(Value::as_str) {
                cmd = cmd.args(["--dtype", dtype]);
            }
            if let Some(util) = params.get("gpu_memory_utilization").and_then(Value::as_f64) {
                cmd = cmd.arg("--gpu-memory-utilization").arg(util.to_string());
            }
        } else {
            cmd = cmd.args([
                "--device",
                "cpu",
                "--dtype",
                "float32",
                "--swap-space",
                "0",
                "--max-num-seqs",
                "1",
                "--enforce-eager",
            ]);
        }

        let mut max_len = params
            .get("max_model_len")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_MODEL_LEN);
        if !self.config.gpu_enabled() {
            max_len = max_len.min(u64::from(self.config.cpu_max_model_len));
        }
        cmd = cmd.arg("--max-model-len").arg(max_len.to_string());

        if params
            .get("trust_remote_code")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            cmd = cmd.arg("--trust-remote-code");
        }

        if kind == ModelKind::Embedding {
            cmd = cmd.args(["--task", "embed"]);
        }

        cmd
    }
}

impl BackendProvider for VllmProvider {
    fn needs_port(&self, _request: &DeployRequest, _kind: ModelKind) -> bool {
        true
    }

    fn prepare(&self, target: &LaunchTarget<'_>) -> CoreResult<Launch> {
        let port = target.port.ok_or_else(|| {
            CoreError::Internal(format!("vLLM launch for {} has no port", target.instance_id))
        })?;
        let client = OpenAiCompatBackend::new(
            format!("http://{}:{port}", self.config.host),
            target.request.served_model(),
        );
        Ok(Launch::Process {
            command: self.command(target.request, target.kind, port),
            readiness: Arc::new(MarkerProbe::vllm()),
            client: Arc::new(client),
        })
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

type BackendFactory =
    dyn Fn(&LaunchTarget<'_>) -> CoreResult<Arc<dyn InferenceBackend>> + Send + Sync;

/// Builds an in-process backend per deploy from a factory closure.
pub struct InProcessProvider {
    factory: Box<BackendFactory>,
}

impl InProcessProvider {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&LaunchTarget<'_>) -> CoreResult<Arc<dyn InferenceBackend>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }
}

impl BackendProvider for InProcessProvider {
    fn needs_port(&self, _request: &DeployRequest, _kind: ModelKind) -> bool {
        false
    }

    fn prepare(&self, target: &LaunchTarget<'_>) -> CoreResult<Launch> {
        Ok(Launch::InProcess {
            backend: (self.factory)(target)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn cpu() -> VllmProvider {
        VllmProvider::default()
    }

    fn gpu() -> VllmProvider {
        VllmProvider::new(VllmConfig {
            force_cpu: false,
            use_gpu: true,
            ..Default::default()
        })
    }

    fn flag_value<'a>(cmd: &'a ProcessCommand, flag: &str) -> Option<&'a str> {
        let pos = cmd.args.iter().position(|a| a == flag)?;
        cmd.args.get(pos + 1).map(String::as_str)
    }

    #[test]
    fn cpu_mode_adds_cpu_flags_and_clamps_context() {
        let req = DeployRequest::new("gpt2").with_parameter("max_model_len", json!(8192));
        let cmd = cpu().command(&req, ModelKind::Chat, 8000);
        assert_eq!(cmd.program, "python");
        assert_eq!(flag_value(&cmd, "--device"), Some("cpu"));
        assert_eq!(flag_value(&cmd, "--max-model-len"), Some("2048"));
        assert!(cmd.args.iter().any(|a| a == "--enforce-eager"));
    }

    #[test]
    fn gpu_mode_passes_through_gpu_parameters() {
        let req = DeployRequest::new("Qwen/Qwen2-0.5B")
            .with_parameter("dtype", json!("half"))
            .with_parameter("gpu_memory_utilization", json!(0.8))
            .with_parameter("trust_remote_code", json!(true));
        let cmd = gpu().command(&req, ModelKind::Chat, 8001);
        assert_eq!(flag_value(&cmd, "--dtype"), Some("half"));
        assert_eq!(flag_value(&cmd, "--gpu-memory-utilization"), Some("0.8"));
        assert_eq!(flag_value(&cmd, "--max-model-len"), Some("4096"));
        assert!(cmd.args.iter().any(|a| a == "--trust-remote-code"));
        assert!(!cmd.args.iter().any(|a| a == "--device"));
    }

    #[test]
    fn local_path_replaces_model_name() {
        let mut req = DeployRequest::new("gpt2");
        req.local_path = Some("/models/gpt2".into());
        let cmd = cpu().command(&req, ModelKind::Chat, 8000);
        assert_eq!(flag_value(&cmd, "--model"), Some("/models/gpt2"));
        assert_eq!(flag_value(&cmd, "--port"), Some("8000"));
    }

    #[test]
    fn embedding_kind_selects_embed_task() {
        let req = DeployRequest::new("BAAI/bge-small-en-v1.5");
        let cmd = cpu().command(&req, ModelKind::Embedding, 8000);
        assert_eq!(flag_value(&cmd, "--task"), Some("embed"));
    }

    #[test]
    fn prepare_without_port_is_an_error() {
        let req = DeployRequest::new("gpt2");
        let target = LaunchTarget {
            instance_id: "gpt2-1",
            request: &req,
            kind: ModelKind::Chat,
            port: None,
        };
        assert_matches!(cpu().prepare(&target), Err(CoreError::Internal(_)));
    }
}

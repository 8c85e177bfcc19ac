//! Instance lifecycle orchestration.
//!
//! [`InstanceManager`] owns the registry of deployed models. `deploy`
//! validates and registers synchronously, then hands the slow part (spawn
//! or weight loading) to a background task so callers return immediately
//! and poll status. Lifecycle failures never cross this boundary as
//! errors: they land in the instance's status, `error_message`, and logs.
//!
//! ```text
//! deploy ─► INITIALIZING ─► start task ─┬─ in-process: load() ─► RUNNING | FAILED
//!                                       └─ process: spawn ─► supervisor ─► RUNNING | ERROR
//! stop   ─► STOPPING ─► terminate/unload ─► STOPPED (port released)
//! remove ─► stop ─► delete record + logs
//! ```

use std::sync::Arc;

use chrono::Utc;
use llmops_core::error::{CoreError, CoreResult};
use llmops_core::instance::{
    port_instance_id, timestamped_instance_id, DeployRequest, Instance, InstanceStatus,
};
use llmops_core::logs::{LogLevel, LogStore};
use llmops_core::model_kind::{ModelClassifier, ModelKind, NamePatternClassifier};
use llmops_core::readiness::ReadinessProbe;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, GenerationParams, InferenceBackend, TextStream};
use crate::config::ManagerConfig;
use crate::events::InstanceEvent;
use crate::process::{spawn_supervised, ProcessCommand, ProcessHandle, StopOutcome, StopPolicy};
use crate::provider::{BackendProvider, Launch, LaunchTarget};
use crate::registry::{InstanceRecord, Registry};

/// Deploys, supervises, and tears down model instances.
///
/// Created once at startup; the returned `Arc` is cheap to clone into
/// request handlers and the workflow executor.
pub struct InstanceManager {
    registry: Arc<Registry>,
    provider: Arc<dyn BackendProvider>,
    classifier: Arc<dyn ModelClassifier>,
    config: ManagerConfig,
    /// Master cancellation token, cancelled by `shutdown_all`.
    cancel: CancellationToken,
}

impl InstanceManager {
    /// Manager using the default name-pattern classifier.
    pub fn new(config: ManagerConfig, provider: Arc<dyn BackendProvider>) -> Arc<Self> {
        Self::with_classifier(config, provider, Arc::new(NamePatternClassifier::new()))
    }

    pub fn with_classifier(
        config: ManagerConfig,
        provider: Arc<dyn BackendProvider>,
        classifier: Arc<dyn ModelClassifier>,
    ) -> Arc<Self> {
        tracing::info!(
            max_instances = config.max_instances,
            base_port = config.base_port,
            "Instance manager initialized",
        );
        Arc::new(Self {
            registry: Arc::new(Registry::new(config.base_port, config.log_capacity)),
            provider,
            classifier,
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        self.registry.logs()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.registry.subscribe()
    }

    // ---- deploy ----

    /// Register a new instance and start it in the background.
    ///
    /// Fails synchronously only for static problems: invalid request,
    /// live-instance limit, no free port, id collision, or a launch plan the
    /// provider refuses to build. The returned snapshot is usually still
    /// INITIALIZING.
    pub async fn deploy(self: &Arc<Self>, request: DeployRequest) -> CoreResult<Instance> {
        request.validate()?;
        let kind = request
            .kind
            .unwrap_or_else(|| self.classifier.classify(&request.model_name));
        let needs_port = self.provider.needs_port(&request, kind);

        let (snapshot, launch, cancel) = {
            let mut instances = self.registry.instances.write().await;

            let live = instances
                .values()
                .filter(|r| r.snapshot.status.is_live())
                .count();
            if live >= self.config.max_instances {
                return Err(CoreError::ResourceLimit(format!(
                    "maximum of {} live instances reached",
                    self.config.max_instances
                )));
            }

            let port = if needs_port {
                Some(self.registry.ports().allocate(request.port)?)
            } else {
                None
            };
            let release_port = || {
                if let Some(p) = port {
                    self.registry.ports().release(p);
                }
            };

            let id = match port {
                Some(p) => port_instance_id(&request.model_name, p),
                None => timestamped_instance_id(&request.model_name, Utc::now(), |candidate| {
                    instances.contains_key(candidate)
                }),
            };
            if instances.contains_key(&id) {
                release_port();
                return Err(CoreError::Conflict(format!("instance {id} already exists")));
            }

            let target = LaunchTarget {
                instance_id: &id,
                request: &request,
                kind,
                port,
            };
            let launch = match self.provider.prepare(&target) {
                Ok(launch) => launch,
                Err(e) => {
                    release_port();
                    return Err(e);
                }
            };

            let snapshot = Instance {
                id: id.clone(),
                model_name: request.model_name.clone(),
                kind,
                port,
                status: InstanceStatus::Initializing,
                parameters: request.parameters.clone(),
                pid: None,
                created_at: Utc::now(),
                start_time: None,
                error_message: None,
            };
            let cancel = self.cancel.child_token();
            instances.insert(id, InstanceRecord::new(snapshot.clone(), cancel.clone()));
            (snapshot, launch, cancel)
        };

        let id = snapshot.id.clone();
        tracing::info!(
            instance_id = %id,
            model = %snapshot.model_name,
            kind = %kind,
            port = ?snapshot.port,
            "Deploying model",
        );
        self.registry.log(
            &id,
            LogLevel::Info,
            format!("Deploying {} ({kind})", request.served_model()),
        );
        self.registry.publish(InstanceEvent::Deployed {
            instance_id: id.clone(),
            model_name: snapshot.model_name.clone(),
            port: snapshot.port,
        });

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            match launch {
                Launch::InProcess { backend } => manager.load_in_process(&id, backend, cancel).await,
                Launch::Process {
                    command,
                    readiness,
                    client,
                } => manager.launch_process(&id, command, readiness, client).await,
            }
        });

        Ok(snapshot)
    }

    async fn load_in_process(
        &self,
        id: &str,
        backend: Arc<dyn InferenceBackend>,
        cancel: CancellationToken,
    ) {
        if !self.registry.transition(id, InstanceStatus::Starting, None).await {
            return;
        }
        self.registry.log(id, LogLevel::Info, "Loading model weights");

        let result = tokio::select! {
            r = backend.load() => r,
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
        };

        match result {
            Ok(()) => {
                let attached = {
                    let mut instances = self.registry.instances.write().await;
                    match instances.get_mut(id) {
                        Some(record) if record.snapshot.status == InstanceStatus::Starting => {
                            record.backend = Some(Arc::clone(&backend));
                            true
                        }
                        _ => false,
                    }
                };
                if attached {
                    self.registry.transition(id, InstanceStatus::Running, None).await;
                } else {
                    // Stopped while loading; nobody else holds these weights.
                    release_backend(id, backend.as_ref()).await;
                }
            }
            Err(e) => {
                release_backend(id, backend.as_ref()).await;
                let message = match e {
                    BackendError::Cancelled => "Load cancelled".to_string(),
                    other => format!("Load failed: {other}"),
                };
                self.registry
                    .transition(id, InstanceStatus::Failed, Some(message))
                    .await;
            }
        }
    }

    async fn launch_process(
        &self,
        id: &str,
        command: ProcessCommand,
        readiness: Arc<dyn ReadinessProbe>,
        client: Arc<dyn InferenceBackend>,
    ) {
        {
            let mut instances = self.registry.instances.write().await;
            let Some(record) = instances.get_mut(id) else {
                return;
            };
            let Some(t) = Registry::apply(record, InstanceStatus::Starting, None) else {
                return;
            };
            record.backend = Some(client);
            drop(instances);
            self.registry.announce(id, t);
        }

        self.registry
            .log(id, LogLevel::Info, format!("Launching: {}", command.display()));

        let policy = StopPolicy {
            grace: self.config.stop_grace,
            kill_grace: self.config.kill_grace,
        };
        let handle = match spawn_supervised(
            &command,
            id.to_string(),
            Arc::clone(&self.registry),
            readiness,
            self.config.readiness_timeout,
            policy,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                let message = format!("Failed to spawn process: {e}");
                self.registry
                    .transition(id, InstanceStatus::Failed, Some(message))
                    .await;
                return;
            }
        };

        let pid = handle.pid();
        tracing::info!(instance_id = %id, pid = ?pid, "Model server process spawned");

        let orphan = {
            let mut instances = self.registry.instances.write().await;
            match instances.get_mut(id) {
                Some(record)
                    if !record.snapshot.status.is_terminal()
                        && record.snapshot.status != InstanceStatus::Stopping =>
                {
                    // An early exit may already have cleared the pid.
                    if matches!(
                        record.snapshot.status,
                        InstanceStatus::Starting | InstanceStatus::Running
                    ) {
                        record.snapshot.pid = pid;
                    }
                    record.process = Some(handle);
                    None
                }
                _ => Some(handle),
            }
        };
        if let Some(handle) = orphan {
            // Stopped between spawn and attach.
            let outcome = handle.stop().await;
            tracing::info!(instance_id = %id, outcome = ?outcome, "Stopped orphaned process");
        }
    }

    // ---- queries ----

    pub async fn get(&self, id: &str) -> Option<Instance> {
        self.registry.snapshot(id).await
    }

    /// All instances, oldest first.
    pub async fn list(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self
            .registry
            .instances
            .read()
            .await
            .values()
            .map(|r| r.snapshot.clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub async fn list_by_kind(&self, kind: ModelKind) -> Vec<Instance> {
        self.list().await.into_iter().filter(|i| i.kind == kind).collect()
    }

    /// RUNNING instances, optionally restricted to one kind.
    pub async fn available(&self, kind: Option<ModelKind>) -> Vec<Instance> {
        self.list()
            .await
            .into_iter()
            .filter(|i| i.is_running() && kind.map_or(true, |k| i.kind == k))
            .collect()
    }

    /// Last `lines` formatted log entries (all when `lines <= 0`).
    pub async fn tail_logs(&self, id: &str, lines: i64) -> CoreResult<Vec<String>> {
        if self.registry.status(id).await.is_none() {
            return Err(CoreError::instance_not_found(id));
        }
        Ok(self.registry.logs().tail(id, lines))
    }

    // ---- stop / remove ----

    /// Stop an instance and release its port.
    ///
    /// Idempotent: stopping a STOPPED or FAILED instance only makes sure
    /// its resources are released. A stop racing another in-flight stop
    /// waits until the first one finishes. Termination problems are logged,
    /// never returned; the instance ends STOPPED regardless.
    pub async fn stop(&self, id: &str) -> CoreResult<Instance> {
        let (process, backend, port, stopped) = {
            let mut instances = self.registry.instances.write().await;
            let record = instances
                .get_mut(id)
                .ok_or_else(|| CoreError::instance_not_found(id))?;

            match record.snapshot.status {
                InstanceStatus::Stopping => {
                    let stopped = record.stopped.clone();
                    drop(instances);
                    stopped.cancelled().await;
                    return self
                        .registry
                        .snapshot(id)
                        .await
                        .ok_or_else(|| CoreError::instance_not_found(id));
                }
                status if status.is_terminal() => {
                    record.cancel.cancel();
                    let backend = record.backend.take();
                    let process = record.process.take();
                    let port = record.port.take();
                    let snapshot = record.snapshot.clone();
                    drop(instances);
                    self.release(id, process, backend, port).await;
                    return Ok(snapshot);
                }
                _ => {}
            }

            let Some(t) = Registry::apply(record, InstanceStatus::Stopping, None) else {
                return Ok(record.snapshot.clone());
            };
            record.cancel.cancel();
            let taken = (
                record.process.take(),
                record.backend.take(),
                record.port.take(),
                record.stopped.clone(),
            );
            drop(instances);
            self.registry.announce(id, t);
            taken
        };

        tracing::info!(instance_id = %id, "Stopping instance");
        self.release(id, process, backend, port).await;
        self.registry.set_pid(id, None).await;
        self.registry.transition(id, InstanceStatus::Stopped, None).await;
        stopped.cancel();

        self.registry
            .snapshot(id)
            .await
            .ok_or_else(|| CoreError::instance_not_found(id))
    }

    /// Terminate the process, unload the backend, and free the port.
    async fn release(
        &self,
        id: &str,
        process: Option<ProcessHandle>,
        backend: Option<Arc<dyn InferenceBackend>>,
        port: Option<u16>,
    ) {
        if let Some(handle) = process {
            match handle.stop().await {
                StopOutcome::Unconfirmed(reason) => {
                    tracing::error!(instance_id = %id, reason = %reason, "Process exit not confirmed");
                    self.registry.log(
                        id,
                        LogLevel::Error,
                        format!("Process exit not confirmed: {reason}"),
                    );
                }
                StopOutcome::Killed { .. } => {
                    self.registry.log(
                        id,
                        LogLevel::Warning,
                        "Process ignored terminate signal and was killed",
                    );
                }
                outcome => {
                    self.registry
                        .log(id, LogLevel::Info, format!("Process stopped: {outcome:?}"));
                }
            }
        }
        if let Some(backend) = backend {
            release_backend(id, backend.as_ref()).await;
        }
        if let Some(port) = port {
            self.registry.ports().release(port);
        }
    }

    /// Stop (if needed) and delete an instance and its logs.
    pub async fn remove(&self, id: &str) -> CoreResult<()> {
        self.stop(id).await?;

        if self.registry.instances.write().await.remove(id).is_none() {
            return Err(CoreError::instance_not_found(id));
        }
        self.registry.logs().remove(id);
        self.registry.publish(InstanceEvent::Removed {
            instance_id: id.to_string(),
        });
        tracing::info!(instance_id = %id, "Instance removed");
        Ok(())
    }

    /// Stop every instance. Called once at process teardown.
    pub async fn shutdown_all(&self) {
        tracing::info!("Shutting down all instances");
        self.cancel.cancel();

        let ids: Vec<String> = self
            .registry
            .instances
            .read()
            .await
            .keys()
            .cloned()
            .collect();
        let results =
            futures::future::join_all(ids.iter().map(|id| async move { (id, self.stop(id).await) }))
                .await;
        for (id, result) in results {
            if let Err(e) = result {
                tracing::warn!(instance_id = %id, error = %e, "Failed to stop instance during shutdown");
            }
        }

        tracing::info!(count = ids.len(), "Instance manager shut down complete");
    }

    // ---- inference ----

    pub async fn generate(
        &self,
        id: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> CoreResult<String> {
        let backend = self.running_backend(id, ModelKind::Chat).await?;
        match backend.generate(prompt, params).await {
            Ok(text) => Ok(text),
            Err(e) => Err(self.inference_failed(id, e).await),
        }
    }

    pub async fn generate_stream(
        &self,
        id: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> CoreResult<TextStream> {
        let backend = self.running_backend(id, ModelKind::Chat).await?;
        match backend.generate_stream(prompt, params).await {
            Ok(stream) => Ok(stream),
            Err(e) => Err(self.inference_failed(id, e).await),
        }
    }

    pub async fn encode(&self, id: &str, text: &str) -> CoreResult<Vec<f32>> {
        let backend = self.running_backend(id, ModelKind::Embedding).await?;
        match backend.encode(text).await {
            Ok(vector) => Ok(vector),
            Err(e) => Err(self.inference_failed(id, e).await),
        }
    }

    async fn running_backend(
        &self,
        id: &str,
        required: ModelKind,
    ) -> CoreResult<Arc<dyn InferenceBackend>> {
        let instances = self.registry.instances.read().await;
        let record = instances
            .get(id)
            .ok_or_else(|| CoreError::instance_not_found(id))?;
        let snapshot = &record.snapshot;

        if snapshot.status != InstanceStatus::Running {
            return Err(CoreError::InvalidState {
                id: id.to_string(),
                status: snapshot.status,
            });
        }
        if snapshot.kind != required {
            let op = match required {
                ModelKind::Chat => "text generation",
                ModelKind::Embedding => "encoding",
            };
            return Err(CoreError::Validation(format!(
                "instance {id} is a {} model and does not support {op}",
                snapshot.kind
            )));
        }
        record
            .backend
            .clone()
            .ok_or_else(|| CoreError::Internal(format!("instance {id} has no backend attached")))
    }

    async fn inference_failed(&self, id: &str, err: BackendError) -> CoreError {
        self.registry
            .log(id, LogLevel::Error, format!("Inference failed: {err}"));
        if err.is_fatal() {
            self.registry
                .transition(id, InstanceStatus::Error, Some(err.to_string()))
                .await;
        }
        err.into()
    }
}

async fn release_backend(id: &str, backend: &dyn InferenceBackend) {
    if let Err(e) = backend.unload().await {
        tracing::warn!(instance_id = %id, error = %e, "Failed to unload backend");
    }
}

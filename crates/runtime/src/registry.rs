//! The instance registry: the one shared table of live instances, plus the
//! port allocator, log store, and event channel that travel with it.
//!
//! Status changes go through [`Registry::transition`] (or
//! [`Registry::apply`] + [`Registry::announce`] when the caller already holds
//! the write lock), which enforces the state machine and mirrors every
//! change into the instance's log buffer, `tracing`, and the event channel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use llmops_core::instance::{Instance, InstanceStatus};
use llmops_core::logs::{LogLevel, LogStore};
use llmops_core::ports::PortAllocator;
use llmops_core::types::InstanceId;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::backend::InferenceBackend;
use crate::events::InstanceEvent;
use crate::process::ProcessHandle;

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Internal bookkeeping for one instance.
pub(crate) struct InstanceRecord {
    pub(crate) snapshot: Instance,
    /// Attached once a launch is prepared; taken on stop.
    pub(crate) backend: Option<Arc<dyn InferenceBackend>>,
    /// Present while a supervised subprocess is attached.
    pub(crate) process: Option<ProcessHandle>,
    /// Port held in the allocator on behalf of this instance. Taken exactly
    /// once when the instance is stopped; `snapshot.port` stays for display.
    pub(crate) port: Option<u16>,
    /// Child of the manager's master token; cancels an in-flight load.
    pub(crate) cancel: CancellationToken,
    /// Fired once a stop has finished releasing resources.
    pub(crate) stopped: CancellationToken,
}

impl InstanceRecord {
    pub(crate) fn new(snapshot: Instance, cancel: CancellationToken) -> Self {
        Self {
            port: snapshot.port,
            snapshot,
            backend: None,
            process: None,
            cancel,
            stopped: CancellationToken::new(),
        }
    }
}

/// A status change that was applied and still has to be announced.
#[derive(Debug, Clone)]
pub(crate) struct Transition {
    from: InstanceStatus,
    to: InstanceStatus,
    error: Option<String>,
}

pub struct Registry {
    pub(crate) instances: RwLock<HashMap<InstanceId, InstanceRecord>>,
    ports: PortAllocator,
    logs: Arc<LogStore>,
    event_tx: broadcast::Sender<InstanceEvent>,
}

impl Registry {
    pub fn new(base_port: u16, log_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            instances: RwLock::new(HashMap::new()),
            ports: PortAllocator::new(base_port),
            logs: Arc::new(LogStore::new(log_capacity)),
            event_tx,
        }
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.event_tx.subscribe()
    }

    /// Publish to all current subscribers; dropped silently when there are none.
    pub(crate) fn publish(&self, event: InstanceEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn log(&self, id: &str, level: LogLevel, message: impl Into<String>) {
        self.logs.append(id, level, message);
    }

    pub async fn status(&self, id: &str) -> Option<InstanceStatus> {
        self.instances.read().await.get(id).map(|r| r.snapshot.status)
    }

    pub async fn snapshot(&self, id: &str) -> Option<Instance> {
        self.instances.read().await.get(id).map(|r| r.snapshot.clone())
    }

    pub(crate) async fn set_pid(&self, id: &str, pid: Option<u32>) {
        if let Some(record) = self.instances.write().await.get_mut(id) {
            record.snapshot.pid = pid;
        }
    }

    /// Apply `to` if the state machine allows it. Returns `true` when applied.
    pub async fn transition(&self, id: &str, to: InstanceStatus, error: Option<String>) -> bool {
        let applied = {
            let mut instances = self.instances.write().await;
            match instances.get_mut(id) {
                Some(record) => Self::apply(record, to, error),
                None => None,
            }
        };
        match applied {
            Some(t) => {
                self.announce(id, t);
                true
            }
            None => false,
        }
    }

    /// Mutate the record in place under a lock the caller holds.
    pub(crate) fn apply(
        record: &mut InstanceRecord,
        to: InstanceStatus,
        error: Option<String>,
    ) -> Option<Transition> {
        let from = record.snapshot.status;
        if !from.can_transition_to(to) {
            tracing::debug!(
                instance_id = %record.snapshot.id,
                from = %from,
                to = %to,
                "Ignoring disallowed status transition",
            );
            return None;
        }

        record.snapshot.status = to;
        if to == InstanceStatus::Starting {
            record.snapshot.start_time = Some(Utc::now());
        }
        if error.is_some() {
            record.snapshot.error_message = error.clone();
        }
        Some(Transition { from, to, error })
    }

    /// Mirror an applied transition into logs, tracing, and events.
    pub(crate) fn announce(&self, id: &str, t: Transition) {
        match &t.error {
            Some(err) => {
                self.log(id, LogLevel::Error, format!("Status {} -> {}: {err}", t.from, t.to));
                tracing::error!(instance_id = %id, from = %t.from, to = %t.to, error = %err, "Instance failed");
            }
            None => {
                self.log(id, LogLevel::Info, format!("Status {} -> {}", t.from, t.to));
                tracing::info!(instance_id = %id, from = %t.from, to = %t.to, "Instance status changed");
            }
        }
        self.publish(InstanceEvent::StatusChanged {
            instance_id: id.to_string(),
            from: t.from,
            to: t.to,
            error: t.error,
        });
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use llmops_core::model_kind::ModelKind;

    use super::*;

    fn instance(id: &str) -> Instance {
        Instance {
            id: id.to_string(),
            model_name: "gpt2".to_string(),
            kind: ModelKind::Chat,
            port: None,
            status: InstanceStatus::Initializing,
            parameters: Default::default(),
            pid: None,
            created_at: Utc::now(),
            start_time: None,
            error_message: None,
        }
    }

    async fn registry_with(id: &str) -> Registry {
        let registry = Registry::new(8000, 10);
        registry.instances.write().await.insert(
            id.to_string(),
            InstanceRecord::new(instance(id), CancellationToken::new()),
        );
        registry
    }

    #[tokio::test]
    async fn allowed_transition_is_logged_and_published() {
        let registry = registry_with("a").await;
        let mut rx = registry.subscribe();

        assert!(registry.transition("a", InstanceStatus::Starting, None).await);

        let snap = registry.snapshot("a").await.unwrap();
        assert_eq!(snap.status, InstanceStatus::Starting);
        assert!(snap.start_time.is_some());
        assert_eq!(registry.logs().tail("a", 0).len(), 1);
        assert_matches!(
            rx.recv().await.unwrap(),
            InstanceEvent::StatusChanged { from: InstanceStatus::Initializing, to: InstanceStatus::Starting, .. }
        );
    }

    #[tokio::test]
    async fn disallowed_transition_is_ignored() {
        let registry = registry_with("a").await;
        assert!(!registry.transition("a", InstanceStatus::Running, None).await);
        assert_eq!(registry.status("a").await, Some(InstanceStatus::Initializing));
        assert!(registry.logs().tail("a", 0).is_empty());
    }

    #[tokio::test]
    async fn failure_records_error_message() {
        let registry = registry_with("a").await;
        registry.transition("a", InstanceStatus::Starting, None).await;
        registry
            .transition("a", InstanceStatus::Failed, Some("out of memory".into()))
            .await;
        let snap = registry.snapshot("a").await.unwrap();
        assert_eq!(snap.error_message.as_deref(), Some("out of memory"));
        let last = registry.logs().entries("a", 1).pop().unwrap();
        assert_eq!(last.level, LogLevel::Error);
    }

    #[tokio::test]
    async fn unknown_id_is_not_transitioned() {
        let registry = Registry::new(8000, 10);
        assert!(!registry.transition("ghost", InstanceStatus::Starting, None).await);
    }
}

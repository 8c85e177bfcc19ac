//! Deployed-instance data model and lifecycle state machine.
//!
//! ```text
//! INITIALIZING -> STARTING -> RUNNING -> STOPPING -> STOPPED
//! STARTING -> FAILED            (load error)
//! RUNNING  -> ERROR             (backend reports fatal runtime error)
//! STARTING -> ERROR             (readiness never observed, or exit detected)
//! any non-terminal -> STOPPING  (explicit stop request)
//! ```
//!
//! `STOPPED` and `FAILED` are terminal; such an instance must be removed
//! and redeployed to retry. `INITIALIZING -> FAILED` is additionally
//! allowed for a load that is cancelled before it began.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::model_kind::ModelKind;
use crate::types::{InstanceId, Parameters, Timestamp};

/// Maximum accepted length of a model name or local path.
const MAX_MODEL_NAME_LEN: usize = 512;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a deployed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Failed,
}

impl InstanceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Failed => "FAILED",
        }
    }

    /// `STOPPED` and `FAILED` end an instance's lifetime.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Live instances count against the deploy limit.
    pub const fn is_live(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use InstanceStatus::*;

        match (self, next) {
            (Initializing, Starting) | (Initializing, Failed) => true,
            (Starting, Running) | (Starting, Failed) | (Starting, Error) => true,
            (Running, Error) => true,
            (Stopping, Stopped) => true,
            (from, Stopping) => !from.is_terminal() && from != Stopping,
            _ => false,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Instance snapshot
// ---------------------------------------------------------------------------

/// Read-only snapshot of one deployed model.
///
/// The runtime's registry owns the live record; callers only ever see
/// clones of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub model_name: String,
    pub kind: ModelKind,
    /// Only set for process-based backends.
    pub port: Option<u16>,
    pub status: InstanceStatus,
    pub parameters: Parameters,
    /// OS process id while a subprocess is attached.
    pub pid: Option<u32>,
    pub created_at: Timestamp,
    /// Set on the transition to `STARTING`.
    pub start_time: Option<Timestamp>,
    pub error_message: Option<String>,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }
}

// ---------------------------------------------------------------------------
// Deploy request
// ---------------------------------------------------------------------------

/// Request to deploy a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Hub model id or local name, passed opaquely to the backend.
    pub model_name: String,
    /// Local weights path served instead of `model_name` when present.
    #[serde(default)]
    pub local_path: Option<String>,
    /// Preferred port; a free one is allocated when absent or taken.
    #[serde(default)]
    pub port: Option<u16>,
    /// Explicit capability tag; resolved by the classifier when absent.
    #[serde(default)]
    pub kind: Option<ModelKind>,
    #[serde(default)]
    pub parameters: Parameters,
}

impl DeployRequest {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_kind(mut self, kind: ModelKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// The path or id the backend should load.
    pub fn served_model(&self) -> &str {
        self.local_path.as_deref().unwrap_or(&self.model_name)
    }

    /// Static checks performed synchronously before anything is allocated.
    pub fn validate(&self) -> CoreResult<()> {
        if self.model_name.trim().is_empty() {
            return Err(CoreError::Validation(
                "model_name must not be empty".to_string(),
            ));
        }
        if self.model_name.len() > MAX_MODEL_NAME_LEN {
            return Err(CoreError::Validation(format!(
                "model_name must not exceed {MAX_MODEL_NAME_LEN} characters"
            )));
        }
        if let Some(path) = &self.local_path {
            if path.trim().is_empty() || path.len() > MAX_MODEL_NAME_LEN {
                return Err(CoreError::Validation(
                    "local_path must be non-empty and reasonably short".to_string(),
                ));
            }
        }
        if self.port == Some(0) {
            return Err(CoreError::Validation("port must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Id generation
// ---------------------------------------------------------------------------

/// Last `/`-separated segment of a model name (`Qwen/Qwen2-0.5B` -> `Qwen2-0.5B`).
pub fn short_model_name(model_name: &str) -> &str {
    model_name
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(model_name)
}

/// Id for an instance that owns a port: `<short-name>-<port>`.
pub fn port_instance_id(model_name: &str, port: u16) -> InstanceId {
    format!("{}-{port}", short_model_name(model_name))
}

/// Id for a port-less instance: `<short-name>-<HHMMSS>`, with a numeric
/// suffix appended until `taken` reports the candidate free.
pub fn timestamped_instance_id(
    model_name: &str,
    now: Timestamp,
    taken: impl Fn(&str) -> bool,
) -> InstanceId {
    let base = format!("{}-{}", short_model_name(model_name), now.format("%H%M%S"));
    if !taken(&base) {
        return base;
    }
    (2u32..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

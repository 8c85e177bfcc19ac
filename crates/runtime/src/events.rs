//! Lifecycle events published by the instance manager.

use llmops_core::instance::InstanceStatus;
use llmops_core::types::InstanceId;
use serde::Serialize;

/// A state change of one instance, fanned out to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceEvent {
    /// The instance was registered in INITIALIZING.
    Deployed {
        instance_id: InstanceId,
        model_name: String,
        port: Option<u16>,
    },

    StatusChanged {
        instance_id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
        error: Option<String>,
    },

    /// The instance and its logs were deleted.
    Removed { instance_id: InstanceId },
}

impl InstanceEvent {
    pub fn instance_id(&self) -> &str {
        match self {
            Self::Deployed { instance_id, .. }
            | Self::StatusChanged { instance_id, .. }
            | Self::Removed { instance_id } => instance_id,
        }
    }
}

use crate::instance::InstanceStatus;

/// Domain error taxonomy shared by the runtime, pipeline, and API crates.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A deploy was attempted beyond the configured live-instance limit.
    #[error("Resource limit reached: {0}")]
    ResourceLimit(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation requires a different instance status (usually RUNNING).
    #[error("Instance {id} is {status}, expected RUNNING")]
    InvalidState { id: String, status: InstanceStatus },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Subprocess spawn or termination failed at the OS level.
    #[error("Process error: {0}")]
    Process(String),

    /// The inference backend failed to generate or encode.
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for an unknown instance id.
    pub fn instance_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Instance",
            id: id.into(),
        }
    }
}

/// Convenience alias used across the workspace.
pub type CoreResult<T> = Result<T, CoreError>;

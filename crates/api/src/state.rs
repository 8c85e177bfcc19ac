use std::sync::Arc;

use llmops_pipeline::WorkflowExecutor;
use llmops_runtime::InstanceManager;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Owns every deployed instance.
    pub manager: Arc<InstanceManager>,
    /// Runs playground workflows through `manager`.
    pub executor: Arc<WorkflowExecutor>,
}

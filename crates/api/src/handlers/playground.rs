//! Handlers for the workflow playground.

use axum::extract::State;
use axum::Json;
use llmops_core::workflow::{NodeId, WorkflowDefinition};
use llmops_pipeline::{PreflightReport, WorkflowResult};
use serde::{Deserialize, Serialize};

use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub workflow: WorkflowDefinition,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Serialize)]
pub struct ExecutionOrder {
    pub valid: bool,
    pub error: Option<String>,
    pub layers: Vec<Vec<NodeId>>,
}

/// POST /playground/validate
///
/// Structure check plus "every instance is RUNNING".
pub async fn validate(
    State(state): State<AppState>,
    Json(workflow): Json<WorkflowDefinition>,
) -> Json<DataResponse<PreflightReport>> {
    let graph = workflow.to_graph();
    Json(DataResponse {
        data: state.executor.preflight(&graph).await,
    })
}

/// POST /playground/order
pub async fn execution_order(
    Json(workflow): Json<WorkflowDefinition>,
) -> Json<DataResponse<ExecutionOrder>> {
    let graph = workflow.to_graph();
    let data = match graph.validate() {
        Ok(()) => ExecutionOrder {
            valid: true,
            error: None,
            layers: graph.execution_layers(),
        },
        Err(e) => ExecutionOrder {
            valid: false,
            error: Some(e.to_string()),
            layers: Vec::new(),
        },
    };
    Json(DataResponse { data })
}

/// POST /playground/execute
///
/// Always 200: an invalid graph yields `success: false`, node failures are
/// reported per node.
pub async fn execute(
    State(state): State<AppState>,
    Json(input): Json<ExecuteRequest>,
) -> Json<DataResponse<WorkflowResult>> {
    let graph = input.workflow.to_graph();
    let result = state.executor.execute(&graph, &input.input).await;
    Json(DataResponse { data: result })
}

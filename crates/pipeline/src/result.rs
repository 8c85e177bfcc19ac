//! Serializable outcomes of workflow execution and preflight checks.

use indexmap::IndexMap;
use llmops_core::workflow::NodeId;
use serde::Serialize;
use uuid::Uuid;

/// Outcome of one node. Exactly one of `output` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeResult {
    pub instance_id: String,
    pub model_name: String,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Seconds spent in the generate call.
    pub execution_time: f64,
}

impl NodeResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub execution_id: Uuid,
    /// False only when the graph failed validation; node failures are
    /// reported per node.
    pub success: bool,
    pub error: Option<String>,
    pub cancelled: bool,
    /// Sum of per-node execution times, in seconds.
    pub total_execution_time: f64,
    /// Elapsed seconds for the whole call.
    pub wall_time: f64,
    pub layers: usize,
    pub execution_order: Vec<Vec<NodeId>>,
    /// Keyed by node id, in execution order.
    pub nodes: IndexMap<NodeId, NodeResult>,
}

impl WorkflowResult {
    pub(crate) fn invalid(error: String) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            success: false,
            error: Some(error),
            cancelled: false,
            total_execution_time: 0.0,
            wall_time: 0.0,
            layers: 0,
            execution_order: Vec::new(),
            nodes: IndexMap::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeResult> {
        self.nodes.get(id)
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = (&NodeId, &NodeResult)> {
        self.nodes.iter().filter(|(_, r)| !r.succeeded())
    }
}

/// A node whose instance is missing or not RUNNING.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableNode {
    pub node_id: NodeId,
    pub instance_id: String,
    pub model_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    /// Graph structure is a valid DAG.
    pub valid: bool,
    /// Valid and every referenced instance is RUNNING.
    pub ready: bool,
    pub error: Option<String>,
    pub execution_order: Vec<Vec<NodeId>>,
    pub unavailable: Vec<UnavailableNode>,
}

//! Serializable workflow definitions as sent by the workflow editor.

use serde::{Deserialize, Serialize};

use super::graph::{WorkflowEdge, WorkflowGraph, WorkflowNode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    /// Defaults to `<source>-<target>`.
    #[serde(default)]
    pub id: Option<String>,
}

impl From<EdgeDefinition> for WorkflowEdge {
    fn from(def: EdgeDefinition) -> Self {
        let id = def
            .id
            .unwrap_or_else(|| format!("{}-{}", def.source, def.target));
        WorkflowEdge {
            id,
            source: def.source,
            target: def.target,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl WorkflowDefinition {
    /// Build the graph. Nothing is validated here; call
    /// [`WorkflowGraph::validate`] before executing.
    pub fn to_graph(&self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        for node in &self.nodes {
            graph.add_node(node.clone());
        }
        for edge in &self.edges {
            graph.add_edge(edge.clone().into());
        }
        graph
    }
}

impl From<&WorkflowDefinition> for WorkflowGraph {
    fn from(def: &WorkflowDefinition) -> Self {
        def.to_graph()
    }
}

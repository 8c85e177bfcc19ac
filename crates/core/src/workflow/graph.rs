//! Workflow DAG: permissive construction, strict validation.
//!
//! Edges may reference nodes that do not exist yet; such edges are only
//! reported by [`WorkflowGraph::validate`]. Layering uses Kahn's algorithm
//! over the adjacency and in-degree tables maintained by `add_edge`.

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub type NodeId = String;

/// Canvas coordinates from the workflow editor; carried, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One inference step bound to a deployed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    /// Instance that runs this step. Accepts the legacy `model_id` key.
    #[serde(alias = "model_id")]
    pub instance_id: String,
    /// Display name reported back in results.
    #[serde(default)]
    pub model_name: Option<String>,
    /// `{input}` and `{<predecessor id>}` are substituted before generation.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    #[serde(default)]
    pub position: Option<Position>,
}

fn default_prompt_template() -> String {
    "{input}".to_string()
}

impl WorkflowNode {
    pub fn new(
        id: impl Into<NodeId>,
        instance_id: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            instance_id: instance_id.into(),
            model_name: None,
            prompt_template: prompt_template.into(),
            position: None,
        }
    }

    /// Name shown in results: explicit model name, else the instance id.
    pub fn display_name(&self) -> &str {
        self.model_name.as_deref().unwrap_or(&self.instance_id)
    }
}

/// "`target` consumes `source`'s output."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}-{target}"),
            source,
            target,
        }
    }
}

/// Why a graph cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Workflow has no nodes")]
    Empty,

    #[error("Edge {edge} references undefined node '{node}'")]
    UndefinedNode { edge: String, node: NodeId },

    #[error("Workflow contains a cycle (not a valid DAG)")]
    Cycle,
}

impl From<GraphError> for CoreError {
    fn from(err: GraphError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    nodes: IndexMap<NodeId, WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    /// source -> targets, in edge insertion order.
    adjacency: IndexMap<NodeId, Vec<NodeId>>,
    in_degree: IndexMap<NodeId, usize>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node. Replacing keeps the original position in
    /// iteration order.
    pub fn add_node(&mut self, node: WorkflowNode) {
        self.in_degree.entry(node.id.clone()).or_insert(0);
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_edge(&mut self, edge: WorkflowEdge) {
        self.adjacency
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
        *self.in_degree.entry(edge.target.clone()).or_insert(0) += 1;
        self.in_degree.entry(edge.source.clone()).or_insert(0);
        self.edges.push(edge);
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges pointing at `id`.
    pub fn in_degree(&self, id: &str) -> usize {
        self.in_degree.get(id).copied().unwrap_or(0)
    }

    /// Distinct sources of edges into `id`, in edge order.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        let mut preds: Vec<&str> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.target == id) {
            if !preds.contains(&edge.source.as_str()) {
                preds.push(&edge.source);
            }
        }
        preds
    }

    pub fn successors(&self, id: &str) -> &[NodeId] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Empty graph, then dangling edges, then cycles.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !self.nodes.contains_key(end) {
                    return Err(GraphError::UndefinedNode {
                        edge: edge.id.clone(),
                        node: end.clone(),
                    });
                }
            }
        }

        let mut in_degree = self.in_degree.clone();
        let mut queue: VecDeque<&str> = self
            .in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.as_str())
            .collect();
        let mut processed = 0;

        while let Some(current) = queue.pop_front() {
            processed += 1;
            for next in self.successors(current) {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if processed == self.in_degree.len() {
            Ok(())
        } else {
            Err(GraphError::Cycle)
        }
    }

    /// Layers of mutually independent nodes; each layer only depends on
    /// earlier layers. Within a layer, nodes follow insertion order.
    ///
    /// Only nodes present in the graph are layered. Nodes on or behind a
    /// cycle never reach in-degree zero and are left out.
    pub fn execution_layers(&self) -> Vec<Vec<NodeId>> {
        let mut in_degree: IndexMap<&str, usize> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), 0))
            .collect();
        for edge in &self.edges {
            if self.nodes.contains_key(&edge.source) {
                if let Some(d) = in_degree.get_mut(edge.target.as_str()) {
                    *d += 1;
                }
            }
        }

        let mut layers = Vec::new();
        loop {
            let layer: Vec<&str> = in_degree
                .iter()
                .filter(|(_, d)| **d == 0)
                .map(|(id, _)| *id)
                .collect();
            if layer.is_empty() {
                break;
            }
            for id in &layer {
                in_degree.shift_remove(id);
            }
            for id in &layer {
                for next in self.successors(id) {
                    if let Some(d) = in_degree.get_mut(next.as_str()) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
            layers.push(layer.into_iter().map(str::to_string).collect());
        }
        layers
    }
}

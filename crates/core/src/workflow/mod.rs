//! Workflow graph model: nodes bound to instances, dependency edges,
//! validation, layering, and prompt templating.

pub mod definition;
pub mod graph;
pub mod prompt;

pub use definition::{EdgeDefinition, WorkflowDefinition};
pub use graph::{GraphError, NodeId, Position, WorkflowEdge, WorkflowGraph, WorkflowNode};
pub use prompt::build_prompt;

//! Workflow execution over deployed model instances.
//!
//! A [`WorkflowGraph`](llmops_core::workflow::WorkflowGraph) is validated,
//! split into dependency layers, and run layer by layer through a
//! [`gateway::ModelGateway`]. Nodes within a layer run concurrently; a
//! failing node is recorded and its dependents see an empty output.

pub mod config;
pub mod executor;
pub mod gateway;
pub mod result;

pub use config::ExecutorConfig;
pub use executor::WorkflowExecutor;
pub use gateway::ModelGateway;
pub use result::{NodeResult, PreflightReport, UnavailableNode, WorkflowResult};

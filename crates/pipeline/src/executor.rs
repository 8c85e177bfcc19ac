//! Layered workflow execution.
//!
//! Layer N starts only after every node of layer N-1 has finished, because
//! later prompts embed earlier outputs. Nodes inside a layer run
//! concurrently and never see each other's outputs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use indexmap::IndexMap;
use llmops_core::workflow::{build_prompt, NodeId, WorkflowGraph, WorkflowNode};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::gateway::ModelGateway;
use crate::result::{NodeResult, PreflightReport, UnavailableNode, WorkflowResult};

/// Error recorded on nodes whose layer never started.
pub const SKIPPED_CANCELLED: &str = "skipped: workflow cancelled";

pub struct WorkflowExecutor {
    gateway: Arc<dyn ModelGateway>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(gateway: Arc<dyn ModelGateway>, config: ExecutorConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Validate, then check every referenced instance is RUNNING.
    pub async fn preflight(&self, graph: &WorkflowGraph) -> PreflightReport {
        if let Err(e) = graph.validate() {
            return PreflightReport {
                valid: false,
                ready: false,
                error: Some(e.to_string()),
                execution_order: Vec::new(),
                unavailable: Vec::new(),
            };
        }

        let mut unavailable = Vec::new();
        for node in graph.nodes() {
            let instance = self.gateway.instance(&node.instance_id).await;
            if !instance.as_ref().is_some_and(|i| i.is_running()) {
                let model_name = match (&node.model_name, instance) {
                    (Some(name), _) => name.clone(),
                    (None, Some(i)) => i.model_name,
                    (None, None) => node.instance_id.clone(),
                };
                unavailable.push(UnavailableNode {
                    node_id: node.id.clone(),
                    instance_id: node.instance_id.clone(),
                    model_name,
                });
            }
        }

        let error = (!unavailable.is_empty()).then(|| {
            let ids: Vec<&str> = unavailable.iter().map(|u| u.node_id.as_str()).collect();
            format!("Instances not running for nodes: {}", ids.join(", "))
        });

        PreflightReport {
            valid: true,
            ready: unavailable.is_empty(),
            error,
            execution_order: graph.execution_layers(),
            unavailable,
        }
    }

    pub async fn execute(&self, graph: &WorkflowGraph, input: &str) -> WorkflowResult {
        self.execute_with_cancel(graph, input, &CancellationToken::new())
            .await
    }

    /// Run the graph, checking `cancel` before each layer.
    ///
    /// A cancelled run lets the in-flight layer finish; nodes of later
    /// layers are reported with [`SKIPPED_CANCELLED`].
    pub async fn execute_with_cancel(
        &self,
        graph: &WorkflowGraph,
        input: &str,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        let started = Instant::now();

        if let Err(e) = graph.validate() {
            tracing::warn!(error = %e, "Workflow rejected");
            return WorkflowResult::invalid(e.to_string());
        }

        let execution_id = Uuid::new_v4();
        let layers = graph.execution_layers();
        tracing::info!(
            execution_id = %execution_id,
            nodes = graph.len(),
            layers = layers.len(),
            "Executing workflow",
        );

        let mut outputs: HashMap<NodeId, String> = HashMap::new();
        let mut results: IndexMap<NodeId, NodeResult> = IndexMap::new();
        let mut cancelled = false;

        for (index, layer) in layers.iter().enumerate() {
            if !cancelled && cancel.is_cancelled() {
                tracing::info!(execution_id = %execution_id, layer = index, "Workflow cancelled");
                cancelled = true;
            }
            let nodes: Vec<&WorkflowNode> = layer.iter().filter_map(|id| graph.node(id)).collect();

            if cancelled {
                for node in nodes {
                    results.insert(node.id.clone(), self.skipped(node).await);
                }
                continue;
            }

            let prompts: Vec<String> = nodes
                .iter()
                .map(|node| {
                    let preds = graph
                        .predecessors(&node.id)
                        .into_iter()
                        .map(|p| (p, outputs.get(p).map(String::as_str).unwrap_or("")));
                    build_prompt(&node.prompt_template, input, preds)
                })
                .collect();

            let layer_results = join_all(
                nodes
                    .iter()
                    .zip(&prompts)
                    .map(|(node, prompt)| self.run_node(node, prompt)),
            )
            .await;

            for (node, result) in nodes.iter().zip(layer_results) {
                if let Some(output) = &result.output {
                    outputs.insert(node.id.clone(), output.clone());
                }
                results.insert(node.id.clone(), result);
            }
            tracing::debug!(execution_id = %execution_id, layer = index, "Layer complete");
        }

        let total_execution_time = results.values().map(|r| r.execution_time).sum();
        let failed = results.values().filter(|r| !r.succeeded()).count();
        let wall_time = started.elapsed().as_secs_f64();
        tracing::info!(
            execution_id = %execution_id,
            failed_nodes = failed,
            cancelled,
            elapsed_ms = (wall_time * 1000.0) as u64,
            "Workflow finished",
        );

        WorkflowResult {
            execution_id,
            success: true,
            error: None,
            cancelled,
            total_execution_time,
            wall_time,
            layers: layers.len(),
            execution_order: layers,
            nodes: results,
        }
    }

    async fn run_node(&self, node: &WorkflowNode, prompt: &str) -> NodeResult {
        let model_name = self.model_name(node).await;
        let started = Instant::now();
        let outcome = self
            .gateway
            .generate(&node.instance_id, prompt, self.config.params())
            .await;
        let execution_time = started.elapsed().as_secs_f64();

        match outcome {
            Ok(text) => NodeResult {
                instance_id: node.instance_id.clone(),
                model_name,
                output: Some(text.trim().to_string()),
                error: None,
                execution_time,
            },
            Err(e) => {
                tracing::warn!(
                    node_id = %node.id,
                    instance_id = %node.instance_id,
                    error = %e,
                    "Workflow node failed",
                );
                NodeResult {
                    instance_id: node.instance_id.clone(),
                    model_name,
                    output: None,
                    error: Some(e.to_string()),
                    execution_time,
                }
            }
        }
    }

    async fn skipped(&self, node: &WorkflowNode) -> NodeResult {
        NodeResult {
            instance_id: node.instance_id.clone(),
            model_name: self.model_name(node).await,
            output: None,
            error: Some(SKIPPED_CANCELLED.to_string()),
            execution_time: 0.0,
        }
    }

    async fn model_name(&self, node: &WorkflowNode) -> String {
        if let Some(name) = &node.model_name {
            return name.clone();
        }
        self.gateway
            .instance(&node.instance_id)
            .await
            .map(|i| i.model_name)
            .unwrap_or_else(|| node.instance_id.clone())
    }
}

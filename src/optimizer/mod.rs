//! Graph Optimizer - eight rewrite passes in a fixed order
//!
//! Each pass runs on the output of the previous one. The result depends
//! only on the input graph, the config flags and the tables, so identical
//! inputs give an identical graph and pass list.

pub mod metrics;
mod passes;
pub mod tables;

pub use metrics::{OptimizationMetrics, PassImpact};
pub use tables::OptimizerTables;

use crate::graph::{ExecutionGraph, GraphValidationError};
use crate::registry::RegistrySnapshot;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Input graph is not a valid DAG: {0}")]
    InvalidInput(#[from] GraphValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    DeadNodeElimination,
    SequentialFusion,
    CacheInsertion,
    RetryAnnotation,
    ParallelGroups,
    CostSubstitution,
    LatencySubstitution,
    Layout,
}

impl Pass {
    pub const ORDER: [Pass; 8] = [
        Pass::DeadNodeElimination,
        Pass::SequentialFusion,
        Pass::CacheInsertion,
        Pass::RetryAnnotation,
        Pass::ParallelGroups,
        Pass::CostSubstitution,
        Pass::LatencySubstitution,
        Pass::Layout,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Pass::DeadNodeElimination => "dead_node_elimination",
            Pass::SequentialFusion => "sequential_fusion",
            Pass::CacheInsertion => "cache_insertion",
            Pass::RetryAnnotation => "retry_annotation",
            Pass::ParallelGroups => "parallel_groups",
            Pass::CostSubstitution => "cost_substitution",
            Pass::LatencySubstitution => "latency_substitution",
            Pass::Layout => "layout",
        }
    }

    pub fn impact(&self) -> PassImpact {
        match self {
            Pass::DeadNodeElimination => metrics::DEAD_NODE_ELIMINATION,
            Pass::SequentialFusion => metrics::SEQUENTIAL_FUSION,
            Pass::CacheInsertion => metrics::CACHE_INSERTION,
            Pass::RetryAnnotation => metrics::RETRY_ANNOTATION,
            Pass::ParallelGroups => metrics::PARALLEL_GROUPS,
            Pass::CostSubstitution => metrics::COST_SUBSTITUTION,
            Pass::LatencySubstitution => metrics::LATENCY_SUBSTITUTION,
            Pass::Layout => metrics::LAYOUT,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn enabled() -> bool {
    true
}

/// Pass switches and ceilings. The two substitution passes only run when
/// their ceiling is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    #[serde(default = "enabled")]
    pub dead_node_elimination: bool,
    #[serde(default = "enabled")]
    pub sequential_fusion: bool,
    #[serde(default = "enabled")]
    pub cache_insertion: bool,
    #[serde(default = "enabled")]
    pub retry_annotation: bool,
    #[serde(default = "enabled")]
    pub parallel_groups: bool,
    #[serde(default = "enabled")]
    pub layout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<f64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            dead_node_elimination: true,
            sequential_fusion: true,
            cache_insertion: true,
            retry_annotation: true,
            parallel_groups: true,
            layout: true,
            max_cost: None,
            max_latency_ms: None,
        }
    }
}

impl OptimizerConfig {
    /// Only the structural passes (1 and 2)
    pub fn structural_only() -> Self {
        Self {
            dead_node_elimination: true,
            sequential_fusion: true,
            cache_insertion: false,
            retry_annotation: false,
            parallel_groups: false,
            layout: false,
            max_cost: None,
            max_latency_ms: None,
        }
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn with_max_latency(mut self, max_latency_ms: f64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    fn runs(&self, pass: Pass) -> bool {
        match pass {
            Pass::DeadNodeElimination => self.dead_node_elimination,
            Pass::SequentialFusion => self.sequential_fusion,
            Pass::CacheInsertion => self.cache_insertion,
            Pass::RetryAnnotation => self.retry_annotation,
            Pass::ParallelGroups => self.parallel_groups,
            Pass::CostSubstitution => self.max_cost.is_some(),
            Pass::LatencySubstitution => self.max_latency_ms.is_some(),
            Pass::Layout => self.layout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProviderPrice {
    cost_per_1k: f64,
    available: bool,
}

/// Provider prices and availability seen by the substitution passes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerContext {
    providers: BTreeMap<String, ProviderPrice>,
}

impl OptimizerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let mut context = Self::new();
        for status in snapshot.providers() {
            context = context.with_provider(&status.profile.id, status.profile.cost.output, status.available);
        }
        context
    }

    pub fn with_provider(mut self, id: &str, cost_per_1k: f64, available: bool) -> Self {
        self.providers.insert(
            id.to_string(),
            ProviderPrice {
                cost_per_1k,
                available,
            },
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.providers.get(id).is_some_and(|p| p.available)
    }

    pub fn cost(&self, id: &str) -> Option<f64> {
        self.providers.get(id).map(|p| p.cost_per_1k)
    }

    /// Most expensive available provider at or under `ceiling`; ties go to the lowest id
    pub fn best_affordable(&self, ceiling: f64) -> Option<&str> {
        self.providers
            .iter()
            .filter(|(_, p)| p.available && p.cost_per_1k <= ceiling)
            .max_by(|(a_id, a), (b_id, b)| {
                OrderedFloat(a.cost_per_1k)
                    .cmp(&OrderedFloat(b.cost_per_1k))
                    .then_with(|| b_id.cmp(a_id))
            })
            .map(|(id, _)| id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub graph: ExecutionGraph,
    /// Passes that changed the graph, in execution order
    pub applied_passes: Vec<String>,
    pub metrics: OptimizationMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    tables: OptimizerTables,
}

impl Optimizer {
    pub fn new(tables: OptimizerTables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &OptimizerTables {
        &self.tables
    }

    pub fn optimize(
        &self,
        graph: ExecutionGraph,
        config: &OptimizerConfig,
        context: &OptimizerContext,
    ) -> Result<OptimizationReport, OptimizerError> {
        graph.validate(&[])?;

        let mut graph = graph;
        let mut metrics = OptimizationMetrics::new(graph.nodes.len(), graph.edges.len());
        let mut applied_passes = Vec::new();

        for pass in Pass::ORDER {
            if !config.runs(pass) {
                continue;
            }
            let changed = self.run_pass(pass, &mut graph, config, context);
            tracing::trace!(pass = %pass, changed, "Optimizer pass finished");
            if changed {
                metrics.add(pass.impact());
                applied_passes.push(pass.name().to_string());
            }
        }

        metrics.nodes_after = graph.nodes.len();
        metrics.edges_after = graph.edges.len();
        tracing::debug!(
            passes = ?applied_passes,
            nodes_before = metrics.nodes_before,
            nodes_after = metrics.nodes_after,
            "Graph optimized"
        );

        Ok(OptimizationReport {
            graph,
            applied_passes,
            metrics,
        })
    }

    fn run_pass(
        &self,
        pass: Pass,
        graph: &mut ExecutionGraph,
        config: &OptimizerConfig,
        context: &OptimizerContext,
    ) -> bool {
        match pass {
            Pass::DeadNodeElimination => passes::dead_node_elimination(graph, &self.tables),
            Pass::SequentialFusion => passes::sequential_fusion(graph, &self.tables),
            Pass::CacheInsertion => passes::cache_insertion(graph, &self.tables),
            Pass::RetryAnnotation => passes::retry_annotation(graph, &self.tables),
            Pass::ParallelGroups => passes::parallel_groups(graph),
            Pass::CostSubstitution => match config.max_cost {
                Some(ceiling) => passes::cost_substitution(graph, &self.tables, context, ceiling),
                None => false,
            },
            Pass::LatencySubstitution => passes::latency_substitution(graph, &self.tables, context),
            Pass::Layout => passes::layout(graph),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{stage, GraphEdge, GraphNode};

    #[test]
    fn test_best_affordable_prefers_most_expensive() {
        let context = OptimizerContext::new()
            .with_provider("cheap", 0.001, true)
            .with_provider("mid", 0.005, true)
            .with_provider("mid-down", 0.008, false)
            .with_provider("premium", 0.03, true);
        assert_eq!(context.best_affordable(0.01), Some("mid"));
        assert_eq!(context.best_affordable(0.0001), None);
    }

    #[test]
    fn test_best_affordable_tie_lowest_id() {
        let context = OptimizerContext::new()
            .with_provider("b", 0.005, true)
            .with_provider("a", 0.005, true);
        assert_eq!(context.best_affordable(0.01), Some("a"));
    }

    #[test]
    fn test_cyclic_input_rejected() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(GraphNode::new("a", stage::PROMPT));
        graph.add_node(GraphNode::new("b", stage::PROMPT));
        graph.add_edge(GraphEdge::link("a", "b"));
        graph.add_edge(GraphEdge::link("b", "a"));
        let result = Optimizer::default().optimize(graph, &OptimizerConfig::default(), &OptimizerContext::new());
        assert!(matches!(result, Err(OptimizerError::InvalidInput(_))));
    }

    #[test]
    fn test_substitution_passes_need_ceilings() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(GraphNode::new("llm", stage::LANGUAGE_MODEL).with_config("provider", "premium"));
        let context = OptimizerContext::new()
            .with_provider("premium", 0.03, true)
            .with_provider("cheap", 0.001, true);

        let report = Optimizer::default()
            .optimize(graph, &OptimizerConfig::default(), &context)
            .unwrap();
        assert!(!report.applied_passes.iter().any(|p| p.ends_with("_substitution")));
        assert_eq!(report.graph.nodes_of_type(stage::LANGUAGE_MODEL).next().unwrap().config_str("provider"), Some("premium"));
    }
}

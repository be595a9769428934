//! The eight rewrite passes. Each returns whether it changed the graph.

use super::tables::OptimizerTables;
use super::OptimizerContext;
use crate::graph::stage::keys;
use crate::graph::{CachePolicy, ExecutionGraph, GraphEdge, GraphNode, Position};
use serde_json::Value;
use std::collections::HashSet;

const LAYOUT_X_SPACING: f64 = 250.0;
const LAYOUT_Y_SPACING: f64 = 150.0;
const MAX_OUTPUT_TOKENS: u64 = 1000;

/// Drop nodes with no incident edge unless their stage type is essential.
/// A lone node is the whole pipeline and is left alone.
pub fn dead_node_elimination(graph: &mut ExecutionGraph, tables: &OptimizerTables) -> bool {
    if graph.nodes.len() <= 1 {
        return false;
    }

    let dead: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| !tables.is_essential(&n.stage_type) && !graph.has_incident_edge(&n.id))
        .map(|n| n.id.clone())
        .collect();

    for id in &dead {
        tracing::trace!(node = %id, "Removing disconnected node");
        graph.remove_node(id);
    }
    !dead.is_empty()
}

/// One scan over the node list merging instruction → instruction pairs.
/// A node takes part in at most one merge per scan.
pub fn sequential_fusion(graph: &mut ExecutionGraph, tables: &OptimizerTables) -> bool {
    let mut touched: HashSet<String> = HashSet::new();
    let mut changed = false;

    for id in graph.node_ids() {
        if touched.contains(&id) {
            continue;
        }
        let Some(first) = graph.node(&id) else {
            continue;
        };
        if !tables.is_instruction(&first.stage_type) {
            continue;
        }

        let outgoing: Vec<&GraphEdge> = graph.outgoing(&id).collect();
        let [edge] = outgoing.as_slice() else {
            continue;
        };
        let Some(second) = graph.node(&edge.target) else {
            continue;
        };
        if touched.contains(&second.id)
            || !tables.is_instruction(&second.stage_type)
            || graph.incoming(&second.id).count() != 1
        {
            continue;
        }

        let second_id = second.id.clone();
        let template = merge_templates(first.config_str(keys::TEMPLATE), second.config_str(keys::TEMPLATE));
        let inherited: Vec<(String, Value)> = second
            .config
            .iter()
            .filter(|(k, _)| k.as_str() != keys::TEMPLATE && !first.config.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        fuse(graph, &id, &second_id, template, inherited);
        tracing::trace!(into = %id, from = %second_id, "Fused sequential instructions");
        touched.insert(id);
        touched.insert(second_id);
        changed = true;
    }
    changed
}

fn merge_templates(first: Option<&str>, second: Option<&str>) -> Option<String> {
    match (first, second) {
        (Some(a), Some(b)) => Some(format!("{}\n\n{}", a, b)),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    }
}

fn fuse(
    graph: &mut ExecutionGraph,
    keep: &str,
    absorb: &str,
    template: Option<String>,
    inherited: Vec<(String, Value)>,
) {
    graph.edges.retain(|e| !(e.source == keep && e.target == absorb));

    let mut rewired = Vec::with_capacity(graph.edges.len());
    for mut edge in std::mem::take(&mut graph.edges) {
        if edge.source == absorb {
            edge.source = keep.to_string();
        }
        if edge.target == absorb {
            edge.target = keep.to_string();
        }
        if !rewired.contains(&edge) {
            rewired.push(edge);
        }
    }
    graph.edges = rewired;

    if let Some(node) = graph.node_mut(keep) {
        if let Some(template) = template {
            node.config.insert(keys::TEMPLATE.to_string(), Value::String(template));
        }
        node.config.extend(inherited);
    }
    graph.remove_node(absorb);
}

/// Put a cache node in front of every cacheable node that lacks one
pub fn cache_insertion(graph: &mut ExecutionGraph, tables: &OptimizerTables) -> bool {
    let targets: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.stage_type != tables.cache_stage && tables.is_cacheable(&n.stage_type))
        .map(|n| n.id.clone())
        .collect();

    let mut changed = false;
    for id in targets {
        let already_cached = graph.incoming(&id).any(|e| {
            graph
                .node(&e.source)
                .is_some_and(|n| n.stage_type == tables.cache_stage)
        });
        if already_cached {
            continue;
        }

        let Some(index) = graph.nodes.iter().position(|n| n.id == id) else {
            continue;
        };
        let cache_id = graph.unique_id(&format!("cache-{}", id));
        let target_position = graph.nodes[index].position;

        let mut cache = GraphNode::new(cache_id.clone(), tables.cache_stage.clone());
        cache.position = Position::new(target_position.x - LAYOUT_X_SPACING / 2.0, target_position.y);
        cache.annotations.cache = Some(CachePolicy {
            ttl_secs: tables.cache_ttl_secs,
        });

        for edge in graph.edges.iter_mut().filter(|e| e.target == id) {
            edge.target = cache_id.clone();
        }
        graph.nodes.insert(index, cache);
        graph.add_edge(GraphEdge::link(cache_id, id));
        changed = true;
    }
    changed
}

pub fn retry_annotation(graph: &mut ExecutionGraph, tables: &OptimizerTables) -> bool {
    let mut changed = false;
    for node in graph.nodes.iter_mut() {
        if tables.is_external_call(&node.stage_type) && node.annotations.retry.is_none() {
            node.annotations.retry = Some(tables.retry_default.clone());
            changed = true;
        }
    }
    changed
}

/// Mark each depth level whose members are pairwise unconnected
pub fn parallel_groups(graph: &mut ExecutionGraph) -> bool {
    let mut assignments: Vec<(String, String)> = Vec::new();

    for (depth, group) in graph.depth_groups().into_iter().enumerate() {
        if group.len() < 2 {
            continue;
        }
        let independent = group.iter().enumerate().all(|(i, a)| {
            group[i + 1..].iter().all(|b| !graph.connected(a, b))
        });
        if !independent {
            continue;
        }
        let label = format!("parallel-{}", depth);
        assignments.extend(group.into_iter().map(|id| (id, label.clone())));
    }

    let mut changed = false;
    for (id, label) in assignments {
        if let Some(node) = graph.node_mut(&id) {
            if node.annotations.parallel_group.as_deref() != Some(label.as_str()) {
                node.annotations.parallel_group = Some(label);
                changed = true;
            }
        }
    }
    changed
}

/// Swap over-budget providers for the most expensive one still within budget
pub fn cost_substitution(
    graph: &mut ExecutionGraph,
    tables: &OptimizerTables,
    context: &OptimizerContext,
    ceiling: f64,
) -> bool {
    let replacement = context.best_affordable(ceiling).map(str::to_string);
    let mut changed = false;

    for node in graph.nodes.iter_mut() {
        if !tables.is_model_call(&node.stage_type) {
            continue;
        }
        let Some(current) = node.config_str(keys::PROVIDER).map(str::to_string) else {
            continue;
        };
        let Some(cost) = context.cost(&current) else {
            continue;
        };
        if cost <= ceiling {
            continue;
        }

        match &replacement {
            Some(substitute) if *substitute != current => {
                tracing::debug!(node = %node.id, from = %current, to = %substitute, "Cost-bounded substitution");
                node.config
                    .insert(keys::PROVIDER.to_string(), Value::String(substitute.clone()));
                changed = true;
            }
            _ => {
                tracing::warn!(node = %node.id, provider = %current, ceiling, "No provider within cost ceiling");
            }
        }
    }
    changed
}

/// Fast provider to switch to. With a populated context it must be one of
/// the context's available providers; an empty context trusts the tables.
fn fast_substitute<'a>(tables: &'a OptimizerTables, context: &OptimizerContext) -> Option<&'a str> {
    if context.is_empty() {
        return Some(tables.default_fast_provider.as_str());
    }
    std::iter::once(&tables.default_fast_provider)
        .chain(tables.fast_providers.iter())
        .find(|id| context.is_available(id))
        .map(String::as_str)
}

/// Streaming on, output length capped, provider moved to the fast list
pub fn latency_substitution(
    graph: &mut ExecutionGraph,
    tables: &OptimizerTables,
    context: &OptimizerContext,
) -> bool {
    let substitute = fast_substitute(tables, context);
    let mut changed = false;

    for node in graph.nodes.iter_mut() {
        if !tables.is_model_call(&node.stage_type) {
            continue;
        }

        if node.config.get(keys::STREAM).and_then(Value::as_bool) != Some(true) {
            node.config.insert(keys::STREAM.to_string(), Value::Bool(true));
            changed = true;
        }

        let too_long = node
            .config
            .get(keys::MAX_TOKENS)
            .and_then(Value::as_u64)
            .is_some_and(|max| max > MAX_OUTPUT_TOKENS);
        if too_long {
            node.config
                .insert(keys::MAX_TOKENS.to_string(), Value::from(MAX_OUTPUT_TOKENS));
            changed = true;
        }

        let is_fast = node
            .config_str(keys::PROVIDER)
            .is_some_and(|p| tables.is_fast(p));
        if !is_fast {
            match substitute {
                Some(fast) => {
                    node.config
                        .insert(keys::PROVIDER.to_string(), Value::String(fast.to_string()));
                    changed = true;
                }
                None => {
                    tracing::warn!(node = %node.id, "No eligible fast provider, keeping current one");
                }
            }
        }
    }
    changed
}

/// x = depth, y = index within the depth group, centered on 0
pub fn layout(graph: &mut ExecutionGraph) -> bool {
    let mut changed = false;

    for (depth, group) in graph.depth_groups().into_iter().enumerate() {
        let center = (group.len() as f64 - 1.0) / 2.0;
        for (index, id) in group.iter().enumerate() {
            let position = Position::new(
                depth as f64 * LAYOUT_X_SPACING,
                (index as f64 - center) * LAYOUT_Y_SPACING,
            );
            if let Some(node) = graph.node_mut(id) {
                if node.position != position {
                    node.position = position;
                    changed = true;
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::stage;

    fn prompt(id: &str, template: &str) -> GraphNode {
        GraphNode::new(id, stage::PROMPT).with_config(keys::TEMPLATE, template)
    }

    #[test]
    fn test_fusion_single_scan_on_three_chain() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(prompt("a", "A"));
        graph.add_node(prompt("b", "B"));
        graph.add_node(prompt("c", "C"));
        graph.add_edge(GraphEdge::link("a", "b"));
        graph.add_edge(GraphEdge::link("b", "c"));

        assert!(sequential_fusion(&mut graph, &OptimizerTables::default()));
        assert_eq!(graph.node_ids(), vec!["a", "c"]);
        assert_eq!(graph.node("a").unwrap().config_str(keys::TEMPLATE), Some("A\n\nB"));
        assert_eq!(graph.edges, vec![GraphEdge::link("a", "c")]);
    }

    #[test]
    fn test_fusion_skips_fan_in() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(prompt("a", "A"));
        graph.add_node(prompt("x", "X"));
        graph.add_node(prompt("b", "B"));
        graph.add_edge(GraphEdge::link("a", "b"));
        graph.add_edge(GraphEdge::link("x", "b"));
        assert!(!sequential_fusion(&mut graph, &OptimizerTables::default()));
    }

    #[test]
    fn test_cache_insertion_redirects_incoming() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(GraphNode::new("in", stage::CHAT_INPUT));
        graph.add_node(GraphNode::new("llm", stage::LANGUAGE_MODEL));
        graph.add_edge(GraphEdge::link("in", "llm"));

        let tables = OptimizerTables::default();
        assert!(cache_insertion(&mut graph, &tables));
        assert_eq!(graph.node_ids(), vec!["in", "cache-llm", "llm"]);
        assert_eq!(
            graph.edges,
            vec![GraphEdge::link("in", "cache-llm"), GraphEdge::link("cache-llm", "llm")]
        );
        assert_eq!(
            graph.node("cache-llm").unwrap().annotations.cache,
            Some(CachePolicy { ttl_secs: 3600 })
        );
        assert!(!cache_insertion(&mut graph, &tables));
    }

    #[test]
    fn test_parallel_groups_marks_independent_level() {
        let mut graph = ExecutionGraph::new();
        for id in ["root", "left", "right", "join"] {
            graph.add_node(GraphNode::new(id, stage::AGENT));
        }
        graph.add_edge(GraphEdge::link("root", "left"));
        graph.add_edge(GraphEdge::link("root", "right"));
        graph.add_edge(GraphEdge::link("left", "join"));
        graph.add_edge(GraphEdge::link("right", "join"));

        assert!(parallel_groups(&mut graph));
        assert_eq!(graph.node("left").unwrap().annotations.parallel_group.as_deref(), Some("parallel-1"));
        assert_eq!(graph.node("right").unwrap().annotations.parallel_group.as_deref(), Some("parallel-1"));
        assert!(graph.node("root").unwrap().annotations.parallel_group.is_none());
        assert!(!parallel_groups(&mut graph));
    }

    #[test]
    fn test_latency_substitution_caps_tokens() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(
            GraphNode::new("llm", stage::LANGUAGE_MODEL)
                .with_config(keys::PROVIDER, "gpt-4o")
                .with_config(keys::MAX_TOKENS, 4096),
        );
        let tables = OptimizerTables::default();
        let context = OptimizerContext::new();
        assert!(latency_substitution(&mut graph, &tables, &context));

        let node = graph.node("llm").unwrap();
        assert_eq!(node.config[keys::MAX_TOKENS], 1000);
        assert_eq!(node.config[keys::STREAM], true);
        assert_eq!(node.config_str(keys::PROVIDER), Some("gpt-4o-mini"));
        assert!(!latency_substitution(&mut graph, &tables, &context));
    }

    #[test]
    fn test_latency_substitution_picks_fast_provider_from_context() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(GraphNode::new("llm", stage::LANGUAGE_MODEL).with_config(keys::PROVIDER, "gpt-4o"));
        let tables = OptimizerTables::default();
        let context = OptimizerContext::new()
            .with_provider("gpt-4o", 0.01, true)
            .with_provider("claude-3-haiku", 0.00125, true);

        assert!(latency_substitution(&mut graph, &tables, &context));
        assert_eq!(graph.node("llm").unwrap().config_str(keys::PROVIDER), Some("claude-3-haiku"));
    }

    #[test]
    fn test_latency_substitution_keeps_provider_without_eligible_fast_one() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(GraphNode::new("llm", stage::LANGUAGE_MODEL).with_config(keys::PROVIDER, "gpt-4o"));
        let tables = OptimizerTables::default();
        let context = OptimizerContext::new().with_provider("gpt-4o", 0.01, true);

        assert!(latency_substitution(&mut graph, &tables, &context));
        let node = graph.node("llm").unwrap();
        assert_eq!(node.config_str(keys::PROVIDER), Some("gpt-4o"));
        assert_eq!(node.config[keys::STREAM], true);
    }

    #[test]
    fn test_layout_centers_groups() {
        let mut graph = ExecutionGraph::new();
        for id in ["a", "b", "c"] {
            graph.add_node(GraphNode::new(id, stage::PROMPT));
        }
        graph.add_edge(GraphEdge::link("a", "b"));
        graph.add_edge(GraphEdge::link("a", "c"));
        layout(&mut graph);
        assert_eq!(graph.node("a").unwrap().position, Position::new(0.0, 0.0));
        assert_eq!(graph.node("b").unwrap().position, Position::new(250.0, -75.0));
        assert_eq!(graph.node("c").unwrap().position, Position::new(250.0, 75.0));
    }
}

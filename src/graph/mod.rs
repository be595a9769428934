//! Execution graph ("flow") data model
//!
//! Nodes are processing stages, edges are port-to-port data dependencies.
//! A graph is created per request, mutated in place by the optimizer and
//! never shared between concurrent requests. Nodes and edges keep their
//! insertion order so every traversal is deterministic.

pub mod stage;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphValidationError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Dangling edge {source_id} -> {target_id}: node {missing} does not exist")]
    DanglingEdge {
        source_id: String,
        target_id: String,
        missing: String,
    },

    #[error("Graph contains a cycle through {0}")]
    Cycle(String),

    #[error("Graph has no terminal node (expected one of: {})", expected.join(", "))]
    MissingTerminal { expected: Vec<String> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-indexed)
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        match self.strategy {
            BackoffStrategy::Fixed => self.initial_backoff_ms,
            BackoffStrategy::Exponential => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
                self.initial_backoff_ms
                    .saturating_mul(factor)
                    .min(self.max_backoff_ms)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachePolicy {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CachePolicy>,
}

impl Annotations {
    pub fn is_empty(&self) -> bool {
        self.retry.is_none() && self.parallel_group.is_none() && self.cache.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphNode {
    pub id: String,
    pub stage_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, stage_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stage_type: stage_type.into(),
            position: Position::default(),
            config: BTreeMap::new(),
            annotations: Annotations::default(),
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphEdge {
    pub source: String,
    pub source_port: String,
    pub target: String,
    pub target_port: String,
}

impl GraphEdge {
    pub fn new(
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_port: source_port.into(),
            target: target.into(),
            target_port: target_port.into(),
        }
    }

    /// Edge between the default `output` and `input` ports
    pub fn link(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, "output", target, "input")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    /// Add an edge unless an identical one already exists
    pub fn add_edge(&mut self, edge: GraphEdge) -> bool {
        if self.edges.contains(&edge) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn has_incident_edge(&self, id: &str) -> bool {
        self.edges.iter().any(|e| e.source == id || e.target == id)
    }

    pub fn connected(&self, a: &str, b: &str) -> bool {
        self.edges
            .iter()
            .any(|e| (e.source == a && e.target == b) || (e.source == b && e.target == a))
    }

    /// Remove a node and every edge touching it
    pub fn remove_node(&mut self, id: &str) -> Option<GraphNode> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        self.edges.retain(|e| e.source != id && e.target != id);
        Some(self.nodes.remove(index))
    }

    /// `base` if free, otherwise `base-2`, `base-3`, ...
    pub fn unique_id(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn nodes_of_type<'a>(&'a self, stage_type: &'a str) -> impl Iterator<Item = &'a GraphNode> + 'a {
        self.nodes.iter().filter(move |n| n.stage_type == stage_type)
    }

    /// Nodes with no incoming edge, in insertion order
    pub fn sources(&self) -> Vec<String> {
        let targets: HashSet<&str> = self.edges.iter().map(|e| e.target.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !targets.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Breadth-first depth from the source nodes; a node keeps the depth it
    /// was first reached at. Nodes never reached land one level below the
    /// deepest one.
    pub fn depths(&self) -> HashMap<String, usize> {
        let mut depth: HashMap<String, usize> = HashMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for source in self.sources() {
            depth.insert(source.clone(), 0);
            queue.push_back(source);
        }

        while let Some(id) = queue.pop_front() {
            let current = depth[&id];
            for edge in self.outgoing(&id) {
                if !depth.contains_key(&edge.target) && self.contains(&edge.target) {
                    depth.insert(edge.target.clone(), current + 1);
                    queue.push_back(edge.target.clone());
                }
            }
        }

        let overflow = depth.values().max().map(|d| d + 1).unwrap_or(0);
        for node in &self.nodes {
            depth.entry(node.id.clone()).or_insert(overflow);
        }
        depth
    }

    /// Node ids grouped by depth; groups keep node insertion order
    pub fn depth_groups(&self) -> Vec<Vec<String>> {
        let depths = self.depths();
        let levels = depths.values().max().map(|d| d + 1).unwrap_or(0);
        let mut groups: Vec<Vec<String>> = vec![Vec::new(); levels];
        for node in &self.nodes {
            groups[depths[&node.id]].push(node.id.clone());
        }
        groups.retain(|g| !g.is_empty());
        groups
    }

    /// Kahn's algorithm; returns the id of a node stuck on a cycle, if any
    pub fn find_cycle(&self) -> Option<String> {
        let mut indegree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = indegree.get_mut(edge.target.as_str()) {
                *d += 1;
            }
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| indegree[id] == 0)
            .collect();
        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for edge in self.outgoing(id) {
                if let Some(d) = indegree.get_mut(edge.target.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(edge.target.as_str());
                    }
                }
            }
        }

        if visited == self.nodes.len() {
            None
        } else {
            self.nodes
                .iter()
                .find(|n| indegree[n.id.as_str()] > 0)
                .map(|n| n.id.clone())
        }
    }

    pub fn is_acyclic(&self) -> bool {
        self.find_cycle().is_none()
    }

    /// Structural validation. `terminal_types` lists stage types of which at
    /// least one node must be present; an empty list skips that check.
    pub fn validate(&self, terminal_types: &[String]) -> Result<(), GraphValidationError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphValidationError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(GraphValidationError::DanglingEdge {
                        source_id: edge.source.clone(),
                        target_id: edge.target.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        if let Some(id) = self.find_cycle() {
            return Err(GraphValidationError::Cycle(id));
        }

        if !terminal_types.is_empty()
            && !self
                .nodes
                .iter()
                .any(|n| terminal_types.iter().any(|t| t == &n.stage_type))
        {
            return Err(GraphValidationError::MissingTerminal {
                expected: terminal_types.to_vec(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> ExecutionGraph {
        let mut graph = ExecutionGraph::new();
        for id in ["a", "b", "c", "d"] {
            graph.add_node(GraphNode::new(id, stage::PROMPT));
        }
        graph.add_edge(GraphEdge::link("a", "b"));
        graph.add_edge(GraphEdge::link("a", "c"));
        graph.add_edge(GraphEdge::link("b", "d"));
        graph.add_edge(GraphEdge::link("c", "d"));
        graph
    }

    #[test]
    fn test_depth_groups_of_diamond() {
        let groups = diamond().depth_groups();
        assert_eq!(
            groups,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()]
            ]
        );
    }

    #[test]
    fn test_remove_node_drops_incident_edges() {
        let mut graph = diamond();
        graph.remove_node("b").unwrap();
        assert_eq!(graph.edges.len(), 2);
        assert!(graph.validate(&[]).is_ok());
    }

    #[test]
    fn test_validate_dangling_edge() {
        let mut graph = diamond();
        graph.edges.push(GraphEdge::link("d", "ghost"));
        assert!(matches!(
            graph.validate(&[]),
            Err(GraphValidationError::DanglingEdge { missing, .. }) if missing == "ghost"
        ));
    }

    #[test]
    fn test_validate_cycle() {
        let mut graph = diamond();
        graph.add_edge(GraphEdge::link("d", "a"));
        assert!(matches!(graph.validate(&[]), Err(GraphValidationError::Cycle(_))));
    }

    #[test]
    fn test_validate_missing_terminal() {
        let graph = diamond();
        let err = graph.validate(&[stage::CHAT_OUTPUT.to_string()]).unwrap_err();
        assert!(err.to_string().contains("ChatOutput"));
    }

    #[test]
    fn test_unique_id_suffixes() {
        let mut graph = diamond();
        assert_eq!(graph.unique_id("z"), "z");
        assert_eq!(graph.unique_id("a"), "a-2");
        graph.add_node(GraphNode::new("a-2", stage::CACHE));
        assert_eq!(graph.unique_id("a"), "a-3");
    }

    #[test]
    fn test_duplicate_edges_ignored() {
        let mut graph = diamond();
        assert!(!graph.add_edge(GraphEdge::link("a", "b")));
        assert_eq!(graph.edges.len(), 4);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_ms(1), 1000);
        assert_eq!(policy.delay_ms(3), 4000);
        assert_eq!(policy.delay_ms(10), 10_000);
    }
}

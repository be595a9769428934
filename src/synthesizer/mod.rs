//! Graph Synthesizer - intent + components + provider → ExecutionGraph
//!
//! The shape of the generated graph depends only on the workflow
//! archetype. Every graph is framed by a `ChatInput` and a `ChatOutput`
//! boundary node. Positions are a plain left-to-right sequence; the
//! optimizer's layout pass replaces them. Validation is left to the caller.

use crate::capability::ComponentDescriptor;
use crate::graph::stage::{self, keys};
use crate::graph::{ExecutionGraph, GraphEdge, GraphNode};
use crate::registry::ProviderProfile;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default cap on worker nodes in a multi-agent graph
pub const DEFAULT_MAX_WORKERS: usize = 3;

const X_SPACING: f64 = 250.0;

/// Languages a code-execution component may declare among its capabilities
const CODE_LANGUAGES: &[&str] = &["python", "javascript", "bash"];
const DEFAULT_CODE_LANGUAGE: &str = "python";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("Multi-agent synthesis needs at least one worker (max_workers = 0)")]
    NoWorkers,

    #[error("Intent has an empty goal")]
    EmptyGoal,
}

/// Closed set of graph shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowArchetype {
    #[default]
    Simple,
    Chain,
    Agent,
    MultiAgent,
}

impl fmt::Display for WorkflowArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowArchetype::Simple => "simple",
            WorkflowArchetype::Chain => "chain",
            WorkflowArchetype::Agent => "agent",
            WorkflowArchetype::MultiAgent => "multi_agent",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for WorkflowArchetype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "simple" => Ok(WorkflowArchetype::Simple),
            "chain" => Ok(WorkflowArchetype::Chain),
            "agent" => Ok(WorkflowArchetype::Agent),
            "multi_agent" | "multiagent" => Ok(WorkflowArchetype::MultiAgent),
            other => Err(format!("unknown workflow archetype: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    #[default]
    Low,
    Medium,
    High,
}

/// Interpreted user intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Intent {
    /// One-sentence description of what the plan must achieve
    pub goal: String,
    /// Capability names, e.g. `retrieval`, `web_search`, `summarization`
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub archetype: WorkflowArchetype,
    #[serde(default)]
    pub complexity: ComplexityTier,
}

impl Intent {
    pub fn new(goal: impl Into<String>, archetype: WorkflowArchetype) -> Self {
        Self {
            goal: goal.into(),
            required_capabilities: Vec::new(),
            archetype,
            complexity: ComplexityTier::Low,
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.required_capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn has_clear_goal(&self) -> bool {
        !self.goal.trim().is_empty()
    }
}

/// Per-request knobs copied onto model-call nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynthesisConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// Force a memory node into simple graphs
    #[serde(default)]
    pub use_memory: bool,
}

/// Builds graphs; ids are `<stage>-<n>` with a counter per stage type
#[derive(Debug, Clone)]
pub struct Synthesizer {
    max_workers: usize,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl Synthesizer {
    pub fn new(max_workers: usize) -> Self {
        Self { max_workers }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn synthesize(
        &self,
        intent: &Intent,
        components: &[ComponentDescriptor],
        provider: &ProviderProfile,
        constraints: &SynthesisConstraints,
    ) -> Result<ExecutionGraph, SynthesisError> {
        if !intent.has_clear_goal() {
            return Err(SynthesisError::EmptyGoal);
        }

        let mut builder = GraphBuilder::new(provider, constraints);
        match intent.archetype {
            WorkflowArchetype::Simple => builder.simple(intent, components),
            WorkflowArchetype::Chain => builder.chain(intent, components),
            WorkflowArchetype::Agent => builder.agent(intent, components),
            WorkflowArchetype::MultiAgent => {
                if self.max_workers == 0 {
                    return Err(SynthesisError::NoWorkers);
                }
                builder.multi_agent(components, self.max_workers)
            }
        }

        let graph = builder.finish();
        tracing::debug!(
            archetype = %intent.archetype,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Graph synthesized"
        );
        Ok(graph)
    }
}

struct GraphBuilder<'a> {
    graph: ExecutionGraph,
    counters: HashMap<String, usize>,
    provider: &'a ProviderProfile,
    constraints: &'a SynthesisConstraints,
}

impl<'a> GraphBuilder<'a> {
    fn new(provider: &'a ProviderProfile, constraints: &'a SynthesisConstraints) -> Self {
        Self {
            graph: ExecutionGraph::new(),
            counters: HashMap::new(),
            provider,
            constraints,
        }
    }

    fn finish(self) -> ExecutionGraph {
        self.graph
    }

    fn add(&mut self, stage_type: &str, configure: impl FnOnce(GraphNode) -> GraphNode) -> String {
        let slug = stage_type.to_lowercase();
        let counter = self.counters.entry(slug.clone()).or_insert(0);
        *counter += 1;
        let id = format!("{}-{}", slug, counter);

        let x = self.graph.nodes.len() as f64 * X_SPACING;
        let node = configure(GraphNode::new(id.clone(), stage_type).at(x, 0.0));
        self.graph.add_node(node);
        id
    }

    fn link(&mut self, source: &str, target: &str) {
        self.graph.add_edge(GraphEdge::link(source, target));
    }

    fn chain_all(&mut self, ids: &[String]) {
        for pair in ids.windows(2) {
            self.link(&pair[0], &pair[1]);
        }
    }

    fn model(&mut self) -> String {
        let provider_id = self.provider.id.clone();
        let max_tokens = self.constraints.max_tokens;
        let stream = self.constraints.stream;
        self.add(stage::LANGUAGE_MODEL, |node| {
            let node = node
                .with_config(keys::PROVIDER, provider_id)
                .with_config(keys::STREAM, stream);
            match max_tokens {
                Some(max) => node.with_config(keys::MAX_TOKENS, max),
                None => node,
            }
        })
    }

    fn component(&mut self, component: &ComponentDescriptor, goal: &str) -> String {
        let template = format!("{}: {}", component.name, goal);
        self.add(&component.stage_type, |node| {
            let node = node.with_config(keys::COMPONENT, component.name.clone());
            match component.stage_type.as_str() {
                stage::PROMPT => node.with_config(keys::TEMPLATE, template),
                stage::CODE_EXECUTOR => {
                    let language = code_language(component);
                    node.with_config(keys::CODE, starter_code(language, goal))
                        .with_config(keys::LANGUAGE, language)
                }
                _ => node,
            }
        })
    }

    fn simple(&mut self, intent: &Intent, components: &[ComponentDescriptor]) {
        let mut path = vec![self.add(stage::CHAT_INPUT, |n| n)];

        let wants_memory = self.constraints.use_memory
            || components.iter().any(|c| c.stage_type == stage::MEMORY);
        if wants_memory {
            path.push(self.add(stage::MEMORY, |n| n));
        }

        let template = format!("You are a helpful assistant. Goal: {}", intent.goal.trim());
        path.push(self.add(stage::INSTRUCTION, |n| n.with_config(keys::TEMPLATE, template)));
        path.push(self.model());
        path.push(self.add(stage::CHAT_OUTPUT, |n| n));
        self.chain_all(&path);
    }

    fn chain(&mut self, intent: &Intent, components: &[ComponentDescriptor]) {
        let mut path = vec![self.add(stage::CHAT_INPUT, |n| n)];
        for component in components {
            path.push(self.component(component, &intent.goal));
        }
        path.push(self.model());
        path.push(self.add(stage::CHAT_OUTPUT, |n| n));
        self.chain_all(&path);
    }

    fn agent(&mut self, intent: &Intent, components: &[ComponentDescriptor]) {
        let input = self.add(stage::CHAT_INPUT, |n| n);
        let model = self.model();
        let coordinator = self.add(stage::AGENT, |n| n.with_config(keys::ROLE, "coordinator"));

        self.link(&model, &coordinator);
        for tool in components.iter().filter(|c| c.is_tool) {
            let id = self.component(tool, &intent.goal);
            self.link(&id, &coordinator);
        }
        self.link(&input, &coordinator);

        let memory = self.add(stage::MEMORY, |n| n);
        let output = self.add(stage::CHAT_OUTPUT, |n| n);
        self.link(&coordinator, &memory);
        self.link(&coordinator, &output);
    }

    fn multi_agent(&mut self, components: &[ComponentDescriptor], max_workers: usize) {
        let input = self.add(stage::CHAT_INPUT, |n| n);
        let model = self.model();
        let supervisor = self.add(stage::AGENT, |n| n.with_config(keys::ROLE, "supervisor"));
        self.link(&input, &supervisor);
        self.link(&model, &supervisor);

        let worker_count = components.len().clamp(1, max_workers);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let assigned = components.get(index).map(|c| c.name.clone());
            let worker = self.add(stage::AGENT, |n| {
                let n = n.with_config(keys::ROLE, "worker");
                match assigned {
                    Some(name) => n.with_config(keys::COMPONENT, name),
                    None => n,
                }
            });
            self.link(&supervisor, &worker);
            self.link(&model, &worker);
            workers.push(worker);
        }

        let output = self.add(stage::CHAT_OUTPUT, |n| n);
        for worker in &workers {
            self.link(worker, &output);
        }
    }
}

fn code_language(component: &ComponentDescriptor) -> &'static str {
    CODE_LANGUAGES
        .iter()
        .find(|lang| component.capabilities.iter().any(|c| c.eq_ignore_ascii_case(lang)))
        .copied()
        .unwrap_or(DEFAULT_CODE_LANGUAGE)
}

/// Placeholder script for a code-execution node: the goal as a comment and a
/// no-op statement, enough for a sandbox dry run to exercise the runtime
fn starter_code(language: &str, goal: &str) -> String {
    let goal: String = goal
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    match language {
        "javascript" => format!("// {}\nconsole.log(\"ready\");\n", goal),
        "bash" => format!("# {}\necho ready\n", goal),
        _ => format!("# {}\nprint(\"ready\")\n", goal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::builtin_catalog;

    fn provider() -> ProviderProfile {
        ProviderProfile::new("gpt-4o", "openai").with_cost(0.005, 0.015)
    }

    fn catalog(names: &[&str]) -> Vec<ComponentDescriptor> {
        builtin_catalog()
            .into_iter()
            .filter(|c| names.contains(&c.name.as_str()))
            .collect()
    }

    #[test]
    fn test_simple_is_linear() {
        let intent = Intent::new("answer questions", WorkflowArchetype::Simple);
        let graph = Synthesizer::default()
            .synthesize(&intent, &[], &provider(), &SynthesisConstraints::default())
            .unwrap();

        let types: Vec<_> = graph.nodes.iter().map(|n| n.stage_type.as_str()).collect();
        assert_eq!(
            types,
            vec![stage::CHAT_INPUT, stage::INSTRUCTION, stage::LANGUAGE_MODEL, stage::CHAT_OUTPUT]
        );
        assert_eq!(graph.edges.len(), 3);
        assert!(graph.validate(&[stage::CHAT_OUTPUT.to_string()]).is_ok());
    }

    #[test]
    fn test_simple_with_memory() {
        let intent = Intent::new("chat", WorkflowArchetype::Simple);
        let constraints = SynthesisConstraints {
            use_memory: true,
            ..Default::default()
        };
        let graph = Synthesizer::default()
            .synthesize(&intent, &[], &provider(), &constraints)
            .unwrap();
        assert_eq!(graph.nodes[1].stage_type, stage::MEMORY);
        assert_eq!(graph.edges.len(), 4);
    }

    #[test]
    fn test_chain_keeps_component_order() {
        let intent = Intent::new("answer from documents", WorkflowArchetype::Chain);
        let components = catalog(&["DocumentLoader", "TextSplitter", "VectorStore"]);
        let graph = Synthesizer::default()
            .synthesize(&intent, &components, &provider(), &SynthesisConstraints::default())
            .unwrap();

        let ids: Vec<_> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "chatinput-1",
                "documentloader-1",
                "textsplitter-1",
                "vectorstore-1",
                "languagemodel-1",
                "chatoutput-1"
            ]
        );
        for pair in graph.nodes.windows(2) {
            assert!(graph.outgoing(&pair[0].id).any(|e| e.target == pair[1].id));
        }
    }

    #[test]
    fn test_agent_fans_in_tools_and_out_to_memory() {
        let intent = Intent::new("research", WorkflowArchetype::Agent);
        let components = catalog(&["WebSearch", "Calculator", "VectorStore"]);
        let graph = Synthesizer::default()
            .synthesize(&intent, &components, &provider(), &SynthesisConstraints::default())
            .unwrap();

        let coordinator = graph.nodes_of_type(stage::AGENT).next().unwrap();
        // model + 2 tools + input
        assert_eq!(graph.incoming(&coordinator.id).count(), 4);
        let memory = graph.nodes_of_type(stage::MEMORY).next().unwrap();
        assert!(graph.connected(&coordinator.id, &memory.id));
        assert!(graph.nodes_of_type(stage::VECTOR_STORE).next().is_none());
    }

    #[test]
    fn test_code_executor_gets_runnable_code() {
        let intent = Intent::new("crunch the numbers", WorkflowArchetype::Agent);
        let components = catalog(&["PythonREPL"]);
        let graph = Synthesizer::default()
            .synthesize(&intent, &components, &provider(), &SynthesisConstraints::default())
            .unwrap();

        let node = graph.nodes_of_type(stage::CODE_EXECUTOR).next().unwrap();
        assert_eq!(node.config_str(keys::LANGUAGE), Some("python"));
        let code = node.config_str(keys::CODE).unwrap();
        assert!(code.starts_with("# crunch the numbers\n"));
        assert!(code.contains("print(\"ready\")"));
    }

    #[test]
    fn test_starter_code_strips_newlines_from_goal() {
        let code = starter_code("bash", "line one\nrm -rf /");
        assert_eq!(code, "# line one rm -rf /\necho ready\n");
    }

    #[test]
    fn test_multi_agent_caps_workers() {
        let intent = Intent::new("big project", WorkflowArchetype::MultiAgent);
        let components = builtin_catalog();
        let graph = Synthesizer::new(3)
            .synthesize(&intent, &components, &provider(), &SynthesisConstraints::default())
            .unwrap();

        let workers: Vec<_> = graph
            .nodes
            .iter()
            .filter(|n| n.config_str(keys::ROLE) == Some("worker"))
            .collect();
        assert_eq!(workers.len(), 3);

        let model = graph.nodes_of_type(stage::LANGUAGE_MODEL).next().unwrap();
        // supervisor + workers share one provider node
        assert_eq!(graph.outgoing(&model.id).count(), 4);
        assert!(graph.validate(&[stage::CHAT_OUTPUT.to_string()]).is_ok());
    }

    #[test]
    fn test_multi_agent_without_workers_fails() {
        let intent = Intent::new("x", WorkflowArchetype::MultiAgent);
        let err = Synthesizer::new(0)
            .synthesize(&intent, &[], &provider(), &SynthesisConstraints::default())
            .unwrap_err();
        assert_eq!(err, SynthesisError::NoWorkers);
    }

    #[test]
    fn test_model_node_carries_constraints() {
        let intent = Intent::new("x", WorkflowArchetype::Simple);
        let constraints = SynthesisConstraints {
            max_tokens: Some(2048),
            stream: true,
            use_memory: false,
        };
        let graph = Synthesizer::default()
            .synthesize(&intent, &[], &provider(), &constraints)
            .unwrap();
        let model = graph.nodes_of_type(stage::LANGUAGE_MODEL).next().unwrap();
        assert_eq!(model.config_str(keys::PROVIDER), Some("gpt-4o"));
        assert_eq!(model.config[keys::MAX_TOKENS], 2048);
        assert_eq!(model.config[keys::STREAM], true);
    }

    #[test]
    fn test_archetype_parsing() {
        assert_eq!("multi-agent".parse::<WorkflowArchetype>(), Ok(WorkflowArchetype::MultiAgent));
        assert!("swarm".parse::<WorkflowArchetype>().is_err());
    }
}

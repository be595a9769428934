//! Capability Index - external lookup of processing-stage components
//!
//! The orchestrator consumes this contract but does not own the catalog
//! behind it. Lookups are best-effort: callers treat an empty list or an
//! error as "no matches" and fall back to a default component set.

use crate::graph::stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A processing-stage component the synthesizer can place in a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDescriptor {
    pub name: String,
    /// Stage type of the node this component becomes
    pub stage_type: String,
    pub category: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Tools are wired into agent coordinators
    #[serde(default)]
    pub is_tool: bool,
}

impl ComponentDescriptor {
    pub fn new(
        name: impl Into<String>,
        stage_type: impl Into<String>,
        category: impl Into<String>,
        capabilities: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            stage_type: stage_type.into(),
            category: category.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            is_tool: false,
        }
    }

    pub fn tool(mut self) -> Self {
        self.is_tool = true;
        self
    }

    fn matches(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }
}

#[async_trait]
pub trait CapabilityIndex: Send + Sync {
    /// Ranked components covering the requested capabilities; may return fewer than asked
    async fn find_components(
        &self,
        required_capabilities: &[String],
    ) -> anyhow::Result<Vec<ComponentDescriptor>>;

    async fn components_by_category(
        &self,
        category: &str,
    ) -> anyhow::Result<Vec<ComponentDescriptor>>;
}

/// Capability index over a fixed, in-memory catalog
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilityIndex {
    components: Vec<ComponentDescriptor>,
}

impl StaticCapabilityIndex {
    pub fn new(components: Vec<ComponentDescriptor>) -> Self {
        Self { components }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_catalog())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[async_trait]
impl CapabilityIndex for StaticCapabilityIndex {
    async fn find_components(
        &self,
        required_capabilities: &[String],
    ) -> anyhow::Result<Vec<ComponentDescriptor>> {
        let mut ranked: Vec<(usize, &ComponentDescriptor)> = self
            .components
            .iter()
            .map(|c| {
                let hits = required_capabilities.iter().filter(|r| c.matches(r)).count();
                (hits, c)
            })
            .filter(|(hits, _)| *hits > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        Ok(ranked.into_iter().map(|(_, c)| c.clone()).collect())
    }

    async fn components_by_category(
        &self,
        category: &str,
    ) -> anyhow::Result<Vec<ComponentDescriptor>> {
        Ok(self
            .components
            .iter()
            .filter(|c| c.category.eq_ignore_ascii_case(category))
            .cloned()
            .collect())
    }
}

/// Catalog used when no external index is configured
pub fn builtin_catalog() -> Vec<ComponentDescriptor> {
    vec![
        ComponentDescriptor::new("WebSearch", stage::WEB_SEARCH, "tools", &["web_search", "search"]).tool(),
        ComponentDescriptor::new("Calculator", stage::CALCULATOR, "tools", &["math", "calculation"]).tool(),
        ComponentDescriptor::new("PythonREPL", stage::CODE_EXECUTOR, "tools", &["code_execution", "python"]).tool(),
        ComponentDescriptor::new("APIRequest", stage::API_REQUEST, "tools", &["api", "http", "integration", "notification"]).tool(),
        ComponentDescriptor::new("DocumentLoader", stage::DOCUMENT_LOADER, "data", &["document_loading", "documents", "pdf", "csv"]),
        ComponentDescriptor::new("URLLoader", stage::URL_LOADER, "data", &["web_scraping", "url"]),
        ComponentDescriptor::new("TextSplitter", stage::TEXT_SPLITTER, "processing", &["chunking", "documents"]),
        ComponentDescriptor::new("VectorStore", stage::VECTOR_STORE, "vectorstores", &["retrieval", "embeddings", "vector_search"]),
        ComponentDescriptor::new("Retriever", stage::RETRIEVER, "retrievers", &["retrieval", "qa"]),
        ComponentDescriptor::new("ConversationMemory", stage::MEMORY, "memories", &["memory", "conversation"]),
        ComponentDescriptor::new("SummaryPrompt", stage::PROMPT, "prompts", &["summarization"]),
        ComponentDescriptor::new("ClassifierPrompt", stage::PROMPT, "prompts", &["classification"]),
        ComponentDescriptor::new("ExtractionPrompt", stage::PROMPT, "prompts", &["extraction"]),
        ComponentDescriptor::new("StructuredOutput", stage::OUTPUT_PARSER, "processing", &["structured_output", "json"]),
    ]
}

/// Components used when every lookup comes back empty
pub fn default_components() -> Vec<ComponentDescriptor> {
    vec![ComponentDescriptor::new(
        "PromptTemplate",
        stage::PROMPT,
        "prompts",
        &["instruction"],
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_components_ranked_by_hits_then_name() {
        let index = StaticCapabilityIndex::builtin();
        let found = index
            .find_components(&["retrieval".to_string(), "embeddings".to_string()])
            .await
            .unwrap();
        let names: Vec<_> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["VectorStore", "Retriever"]);
    }

    #[tokio::test]
    async fn test_unknown_capability_yields_empty() {
        let index = StaticCapabilityIndex::builtin();
        let found = index
            .find_components(&["teleportation".to_string()])
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_components_by_category_case_insensitive() {
        let index = StaticCapabilityIndex::builtin();
        let tools = index.components_by_category("TOOLS").await.unwrap();
        assert_eq!(tools.len(), 4);
        assert!(tools.iter().all(|c| c.is_tool));
    }
}

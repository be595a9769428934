//! Intent interpretation: goal, capabilities, archetype and complexity

use crate::cases::SimilarCase;
use crate::provider::ProviderClient;
use crate::registry::ProviderProfile;
use crate::router::{Router, RoutingRequest};
use crate::synthesizer::{ComplexityTier, Intent, WorkflowArchetype};
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Similarity above which a prior case may lend its capabilities
const CASE_REUSE_SIMILARITY: f64 = 0.85;

const MAX_GOAL_CHARS: usize = 200;

/// `request.task` is the query text; constraints and preferences bound any
/// provider the interpreter calls.
#[async_trait]
pub trait IntentInterpreter: Send + Sync {
    async fn interpret(
        &self,
        request: &RoutingRequest,
        similar: &[SimilarCase],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Intent>;
}

const CAPABILITY_KEYWORDS: &[(&str, &[&str])] = &[
    ("web_search", &["search the web", "web search", "internet", "look up", "latest news", "google"]),
    ("math", &["calculate", "calculation", "math", "compute", "arithmetic"]),
    ("code_execution", &["run code", "execute", "python", "script"]),
    ("document_loading", &["document", "pdf", "csv", "file", "docs"]),
    ("retrieval", &["knowledge base", "retriev", "rag ", "embedding", "vector", "semantic search"]),
    ("summarization", &["summar", "tl;dr", "digest"]),
    ("classification", &["classif", "categori", "label", "triage"]),
    ("extraction", &["extract", "pull out", "parse"]),
    ("memory", &["remember", "memory", "conversation history", "chat history", "follow-up"]),
    ("api", &["api", "webhook", "slack", "email", "notify", "send"]),
    ("web_scraping", &["url", "website", "scrape", "crawl"]),
    ("structured_output", &["json", "structured", "schema"]),
];

const TOOL_CAPABILITIES: &[&str] = &["web_search", "math", "code_execution", "api"];

const MULTI_AGENT_KEYWORDS: &[&str] = &["multi-agent", "multiple agents", "team of", "supervisor", "collaborat", "delegate"];
const AGENT_KEYWORDS: &[&str] = &["agent", "autonomous", "decide", "plan and act", "use tools"];
const CHAIN_KEYWORDS: &[&str] = &["then ", "pipeline", "step by step", "followed by", "after that"];

/// Keyword tables over the query, with near-identical prior cases as fallback context
#[derive(Debug, Clone, Default)]
pub struct HeuristicIntentInterpreter;

impl HeuristicIntentInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Keyword must start at a word boundary ("rag" does not match "average")
    fn matches_keywords(text: &str, keywords: &[&str]) -> bool {
        keywords.iter().any(|kw| {
            text.match_indices(kw).any(|(i, _)| {
                text[..i]
                    .chars()
                    .next_back()
                    .map_or(true, |c| !c.is_alphanumeric())
            })
        })
    }

    fn capabilities(lower: &str) -> Vec<String> {
        CAPABILITY_KEYWORDS
            .iter()
            .filter(|(_, keywords)| Self::matches_keywords(lower, keywords))
            .map(|(capability, _)| capability.to_string())
            .collect()
    }

    fn archetype(lower: &str, capabilities: &[String]) -> WorkflowArchetype {
        if Self::matches_keywords(lower, MULTI_AGENT_KEYWORDS) || capabilities.len() >= 5 {
            return WorkflowArchetype::MultiAgent;
        }
        let uses_tools = capabilities.iter().any(|c| TOOL_CAPABILITIES.contains(&c.as_str()));
        if uses_tools || Self::matches_keywords(lower, AGENT_KEYWORDS) {
            return WorkflowArchetype::Agent;
        }
        if capabilities.len() >= 2 || Self::matches_keywords(lower, CHAIN_KEYWORDS) {
            return WorkflowArchetype::Chain;
        }
        WorkflowArchetype::Simple
    }

    fn complexity(archetype: WorkflowArchetype, capabilities: usize) -> ComplexityTier {
        match (archetype, capabilities) {
            (WorkflowArchetype::MultiAgent, _) => ComplexityTier::High,
            (_, 0..=1) => ComplexityTier::Low,
            (_, 2..=3) => ComplexityTier::Medium,
            _ => ComplexityTier::High,
        }
    }

    fn goal(query: &str) -> String {
        let first_line = query.lines().next().unwrap_or("").trim();
        first_line.chars().take(MAX_GOAL_CHARS).collect()
    }
}

#[async_trait]
impl IntentInterpreter for HeuristicIntentInterpreter {
    async fn interpret(
        &self,
        request: &RoutingRequest,
        similar: &[SimilarCase],
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Intent> {
        let query = request.task.as_str();
        let goal = Self::goal(query);
        if goal.is_empty() {
            bail!("query is empty");
        }

        let lower = query.to_lowercase();
        let mut capabilities = Self::capabilities(&lower);
        let mut archetype = Self::archetype(&lower, &capabilities);

        if capabilities.is_empty() {
            if let Some(best) = similar
                .iter()
                .find(|c| c.similarity >= CASE_REUSE_SIMILARITY)
            {
                tracing::debug!(case = %best.use_case.id, "Borrowing capabilities from similar case");
                capabilities = best.use_case.capabilities.clone();
                archetype = best.use_case.archetype;
            }
        }

        Ok(Intent {
            complexity: Self::complexity(archetype, capabilities.len()),
            goal,
            required_capabilities: capabilities,
            archetype,
        })
    }
}

/// Asks the routed provider for a JSON intent
pub struct LlmIntentInterpreter {
    router: Router,
    client: Arc<dyn ProviderClient>,
    timeout: Duration,
}

impl LlmIntentInterpreter {
    pub fn new(router: Router, client: Arc<dyn ProviderClient>, timeout: Duration) -> Self {
        Self {
            router,
            client,
            timeout,
        }
    }

    fn build_prompt(query: &str, similar: &[SimilarCase]) -> anyhow::Result<String> {
        let schema = serde_json::to_string_pretty(&schemars::schema_for!(Intent))?;
        let mut prompt = format!(
            "Describe the workflow the user needs as a JSON object matching this schema:\n{}\n\n\
             Respond with the JSON object only.\n\nUser request:\n{}\n",
            schema, query
        );
        if !similar.is_empty() {
            prompt.push_str("\nSimilar past requests:\n");
            for case in similar {
                prompt.push_str(&format!(
                    "- \"{}\" ({} workflow, capabilities: {})\n",
                    case.use_case.query,
                    case.use_case.archetype,
                    case.use_case.capabilities.join(", ")
                ));
            }
        }
        Ok(prompt)
    }

    /// Accepts bare JSON or JSON wrapped in prose/code fences
    fn parse_intent(content: &str) -> anyhow::Result<Intent> {
        let start = content.find('{').ok_or_else(|| anyhow!("no JSON object in response"))?;
        let end = content.rfind('}').ok_or_else(|| anyhow!("unterminated JSON object in response"))?;
        if end < start {
            bail!("malformed JSON object in response");
        }
        let intent: Intent = serde_json::from_str(&content[start..=end]).context("response does not match the intent schema")?;
        if !intent.has_clear_goal() {
            bail!("provider returned an intent without a goal");
        }
        Ok(intent)
    }
}

#[async_trait]
impl IntentInterpreter for LlmIntentInterpreter {
    async fn interpret(
        &self,
        request: &RoutingRequest,
        similar: &[SimilarCase],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Intent> {
        let prompt = Self::build_prompt(&request.task, similar)?;
        let client = Arc::clone(&self.client);

        let routed = self
            .router
            .execute_with_fallback(request, self.timeout, cancel, move |profile: Arc<ProviderProfile>| {
                let client = Arc::clone(&client);
                let prompt = prompt.clone();
                async move {
                    let response = client.complete(&profile, &prompt).await?;
                    Self::parse_intent(&response.content)
                }
            })
            .await?;

        tracing::debug!(
            provider = %routed.provider_id,
            fallback = routed.used_fallback,
            "Intent interpreted by provider"
        );
        Ok(routed.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::UseCase;

    async fn interpret(query: &str) -> Intent {
        HeuristicIntentInterpreter::new()
            .interpret(&RoutingRequest::new(query), &[], &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_plain_question_is_simple() {
        let intent = interpret("Write a friendly greeting").await;
        assert_eq!(intent.archetype, WorkflowArchetype::Simple);
        assert_eq!(intent.complexity, ComplexityTier::Low);
        assert!(intent.required_capabilities.is_empty());
    }

    #[tokio::test]
    async fn test_tools_make_an_agent() {
        let intent = interpret("Search the web for prices and calculate the average").await;
        assert_eq!(intent.archetype, WorkflowArchetype::Agent);
        assert_eq!(intent.required_capabilities, vec!["web_search", "math"]);
    }

    #[tokio::test]
    async fn test_document_pipeline_is_chain() {
        let intent = interpret("Summarize each PDF document").await;
        assert_eq!(intent.archetype, WorkflowArchetype::Chain);
        assert_eq!(intent.required_capabilities, vec!["document_loading", "summarization"]);
        assert_eq!(intent.complexity, ComplexityTier::Medium);
    }

    #[tokio::test]
    async fn test_supervisor_is_multi_agent() {
        let intent = interpret("A supervisor coordinating a research team").await;
        assert_eq!(intent.archetype, WorkflowArchetype::MultiAgent);
        assert_eq!(intent.complexity, ComplexityTier::High);
    }

    #[tokio::test]
    async fn test_empty_query_fails() {
        let result = HeuristicIntentInterpreter::new()
            .interpret(&RoutingRequest::new("   "), &[], &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_borrows_from_close_case() {
        let similar = vec![SimilarCase {
            use_case: UseCase {
                id: "faq".to_string(),
                query: "answer customer faq".to_string(),
                archetype: WorkflowArchetype::Chain,
                capabilities: vec!["retrieval".to_string(), "qa".to_string()],
                components: vec![],
                provider_id: None,
            },
            similarity: 0.9,
        }];
        let intent = HeuristicIntentInterpreter::new()
            .interpret(&RoutingRequest::new("answer customer faq"), &similar, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(intent.archetype, WorkflowArchetype::Chain);
        assert_eq!(intent.required_capabilities, vec!["retrieval", "qa"]);
    }

    #[test]
    fn test_parse_intent_from_fenced_json() {
        let content = "Here you go:\n```json\n{\"goal\": \"triage tickets\", \"required_capabilities\": [\"classification\"], \"archetype\": \"chain\", \"complexity\": \"medium\"}\n```";
        let intent = LlmIntentInterpreter::parse_intent(content).unwrap();
        assert_eq!(intent.goal, "triage tickets");
        assert_eq!(intent.archetype, WorkflowArchetype::Chain);
    }

    #[test]
    fn test_parse_intent_rejects_prose() {
        assert!(LlmIntentInterpreter::parse_intent("I cannot help with that").is_err());
    }
}

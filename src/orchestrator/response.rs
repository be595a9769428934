//! Request and response shapes of `orchestrate`

use super::clarify::InfoCategory;
use crate::graph::ExecutionGraph;
use crate::optimizer::OptimizationMetrics;
use crate::router::{RoutingConstraints, RoutingRequest};
use crate::synthesizer::{Intent, WorkflowArchetype};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestrationRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<RoutingConstraints>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_providers: Vec<String>,
    /// Answers keyed by clarification category
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clarification_answers: BTreeMap<String, String>,
}

impl OrchestrationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_constraints(mut self, constraints: RoutingConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_preferred(mut self, providers: Vec<String>) -> Self {
        self.preferred_providers = providers;
        self
    }

    pub fn with_answer(mut self, category: impl Into<String>, answer: impl Into<String>) -> Self {
        self.clarification_answers.insert(category.into(), answer.into());
        self
    }

    /// Lowercased with whitespace collapsed
    pub fn normalized_query(&self) -> String {
        self.query
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Query text plus the clarification answers, as seen by intent interpretation
    pub fn query_with_answers(&self) -> String {
        let mut text = self.query.trim().to_string();
        for (category, answer) in &self.clarification_answers {
            text.push_str(&format!("\n{}: {}", category, answer));
        }
        text
    }

    pub fn routing_request(&self) -> RoutingRequest {
        RoutingRequest {
            task: self.query.clone(),
            preferred_providers: self.preferred_providers.clone(),
            constraints: self.constraints.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub category: InfoCategory,
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

/// A nearby prior case offered alongside clarification questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSuggestion {
    pub case_id: String,
    pub query: String,
    pub archetype: WorkflowArchetype,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationResponse {
    pub questions: Vec<ClarificationQuestion>,
    pub suggestions: Vec<CaseSuggestion>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanEstimate {
    /// Request size used for the cost figure
    pub units: u64,
    pub cost: f64,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    pub intent: Intent,
    pub provider_id: String,
    pub graph: ExecutionGraph,
    pub explanation: String,
    pub estimate: PlanEstimate,
    /// In [0, 0.95]
    pub confidence: f64,
    pub applied_passes: Vec<String>,
    pub metrics: OptimizationMetrics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationResponse {
    Clarification(ClarificationResponse),
    Plan(Box<PlanResponse>),
}

impl OrchestrationResponse {
    pub fn as_plan(&self) -> Option<&PlanResponse> {
        match self {
            OrchestrationResponse::Plan(plan) => Some(plan),
            OrchestrationResponse::Clarification(_) => None,
        }
    }

    pub fn as_clarification(&self) -> Option<&ClarificationResponse> {
        match self {
            OrchestrationResponse::Clarification(c) => Some(c),
            OrchestrationResponse::Plan(_) => None,
        }
    }
}

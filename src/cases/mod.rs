//! Case store - previously successful request/graph pairs
//!
//! The orchestrator reads nearest cases as context and never mutates
//! them. New cases are written only through the feedback path, for plans
//! rated as high quality.

use crate::synthesizer::WorkflowArchetype;
use async_trait::async_trait;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Lowest feedback rating (out of 5) that gets a plan recorded as a case
pub const HIGH_QUALITY_RATING: u8 = 4;

/// A recorded, successful use case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCase {
    pub id: String,
    pub query: String,
    pub archetype: WorkflowArchetype,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Component names used by the plan
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCase {
    pub use_case: UseCase,
    /// Similarity in [0, 1]
    pub similarity: f64,
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Up to `k` nearest cases, best first
    async fn find_similar_cases(&self, query: &str, k: usize) -> anyhow::Result<Vec<SimilarCase>>;

    async fn record_case(&self, use_case: UseCase) -> anyhow::Result<()>;
}

/// Case store with Jaccard word-set similarity over normalized queries
#[derive(Default)]
pub struct InMemoryCaseStore {
    cases: RwLock<Vec<UseCase>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cases(cases: Vec<UseCase>) -> Self {
        Self {
            cases: RwLock::new(cases),
        }
    }

    pub async fn len(&self) -> usize {
        self.cases.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cases.read().await.is_empty()
    }

    fn normalize(query: &str) -> String {
        query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn similarity(a: &str, b: &str) -> f64 {
        let words1: HashSet<&str> = a.split_whitespace().collect();
        let words2: HashSet<&str> = b.split_whitespace().collect();

        if words1.is_empty() && words2.is_empty() {
            return 1.0;
        }

        let intersection = words1.intersection(&words2).count();
        let union = words1.union(&words2).count();
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn find_similar_cases(&self, query: &str, k: usize) -> anyhow::Result<Vec<SimilarCase>> {
        let normalized = Self::normalize(query);
        let cases = self.cases.read().await;

        let mut scored: Vec<SimilarCase> = cases
            .iter()
            .map(|case| SimilarCase {
                similarity: Self::similarity(&normalized, &Self::normalize(&case.query)),
                use_case: case.clone(),
            })
            .filter(|c| c.similarity > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            OrderedFloat(b.similarity)
                .cmp(&OrderedFloat(a.similarity))
                .then_with(|| a.use_case.id.cmp(&b.use_case.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn record_case(&self, use_case: UseCase) -> anyhow::Result<()> {
        let mut cases = self.cases.write().await;
        cases.retain(|c| c.id != use_case.id);
        tracing::debug!(case = %use_case.id, "Recorded use case");
        cases.push(use_case);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, query: &str) -> UseCase {
        UseCase {
            id: id.to_string(),
            query: query.to_string(),
            archetype: WorkflowArchetype::Simple,
            capabilities: vec![],
            components: vec![],
            provider_id: None,
        }
    }

    #[tokio::test]
    async fn test_nearest_cases_sorted_and_truncated() {
        let store = InMemoryCaseStore::with_cases(vec![
            case("1", "summarize pdf documents"),
            case("2", "summarize pdf documents daily"),
            case("3", "translate emails"),
        ]);
        let found = store.find_similar_cases("Summarize PDF documents!", 2).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].use_case.id, "1");
        assert_eq!(found[0].similarity, 1.0);
        assert_eq!(found[1].similarity, 0.75);
    }

    #[tokio::test]
    async fn test_record_case_replaces_same_id() {
        let store = InMemoryCaseStore::new();
        store.record_case(case("a", "first")).await.unwrap();
        store.record_case(case("a", "second")).await.unwrap();
        assert_eq!(store.len().await, 1);
        let found = store.find_similar_cases("second", 5).await.unwrap();
        assert_eq!(found[0].use_case.query, "second");
    }
}

//! Confidence scoring and plan estimates

use super::response::PlanEstimate;
use crate::graph::ExecutionGraph;
use crate::graph::stage::keys;
use crate::optimizer::OptimizerTables;
use crate::registry::ProviderRegistry;
use crate::router::estimate_cost;
use crate::synthesizer::Intent;

const BASE_CONFIDENCE: f64 = 0.5;
const CLEAR_GOAL_BONUS: f64 = 0.2;
const COVERAGE_BONUS: f64 = 0.15;
const CASE_MATCH_BONUS: f64 = 0.15;
const STRONG_CASE_SIMILARITY: f64 = 0.85;
pub const MAX_CONFIDENCE: f64 = 0.95;

pub fn confidence_score(intent: &Intent, component_count: usize, best_similarity: Option<f64>) -> f64 {
    let mut score = BASE_CONFIDENCE;

    if intent.has_clear_goal() && !intent.required_capabilities.is_empty() {
        score += CLEAR_GOAL_BONUS;
    }
    if component_count >= intent.required_capabilities.len() {
        score += COVERAGE_BONUS;
    }
    if best_similarity.is_some_and(|s| s > STRONG_CASE_SIMILARITY) {
        score += CASE_MATCH_BONUS;
    }

    score.min(MAX_CONFIDENCE)
}

/// Cost sums every model call; latency sums the slowest model call of each depth level
pub fn estimate_plan(
    graph: &ExecutionGraph,
    registry: &ProviderRegistry,
    tables: &OptimizerTables,
    units: u64,
) -> PlanEstimate {
    let mut estimate = PlanEstimate {
        units,
        ..Default::default()
    };

    for group in graph.depth_groups() {
        let mut slowest: f64 = 0.0;
        for id in &group {
            let Some(node) = graph.node(id) else { continue };
            if !tables.is_model_call(&node.stage_type) {
                continue;
            }
            let Some(profile) = node.config_str(keys::PROVIDER).and_then(|p| registry.profile(p)) else {
                continue;
            };
            estimate.cost += estimate_cost(&profile, units);
            slowest = slowest.max(profile.latency.time_to_first_token_ms);
        }
        estimate.latency_ms += slowest;
    }
    estimate
}

//! Estimated improvement per pass
//!
//! These are fixed heuristic percentages, not measurements. Each applied
//! pass adds its impact to the matching categories; totals are capped at
//! [`MAX_REDUCTION_PCT`].
//!
//! | pass                   | cost | latency | failure rate |
//! |------------------------|------|---------|--------------|
//! | dead_node_elimination  |  5   |    5    |      0       |
//! | sequential_fusion      | 10   |   15    |      0       |
//! | cache_insertion        | 30   |   40    |      0       |
//! | retry_annotation       |  0   |    0    |     50       |
//! | parallel_groups        |  0   |   30    |      0       |
//! | cost_substitution      | 40   |    0    |      0       |
//! | latency_substitution   |  0   |   35    |      0       |
//! | layout                 |  0   |    0    |      0       |

use serde::{Deserialize, Serialize};

pub const MAX_REDUCTION_PCT: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassImpact {
    pub cost_pct: f64,
    pub latency_pct: f64,
    pub failure_pct: f64,
}

impl PassImpact {
    const fn new(cost_pct: f64, latency_pct: f64, failure_pct: f64) -> Self {
        Self {
            cost_pct,
            latency_pct,
            failure_pct,
        }
    }
}

pub const DEAD_NODE_ELIMINATION: PassImpact = PassImpact::new(5.0, 5.0, 0.0);
pub const SEQUENTIAL_FUSION: PassImpact = PassImpact::new(10.0, 15.0, 0.0);
pub const CACHE_INSERTION: PassImpact = PassImpact::new(30.0, 40.0, 0.0);
pub const RETRY_ANNOTATION: PassImpact = PassImpact::new(0.0, 0.0, 50.0);
pub const PARALLEL_GROUPS: PassImpact = PassImpact::new(0.0, 30.0, 0.0);
pub const COST_SUBSTITUTION: PassImpact = PassImpact::new(40.0, 0.0, 0.0);
pub const LATENCY_SUBSTITUTION: PassImpact = PassImpact::new(0.0, 35.0, 0.0);
pub const LAYOUT: PassImpact = PassImpact::new(0.0, 0.0, 0.0);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub nodes_before: usize,
    pub nodes_after: usize,
    pub edges_before: usize,
    pub edges_after: usize,
    pub estimated_cost_reduction_pct: f64,
    pub estimated_latency_reduction_pct: f64,
    pub estimated_failure_reduction_pct: f64,
}

impl OptimizationMetrics {
    pub fn new(nodes_before: usize, edges_before: usize) -> Self {
        Self {
            nodes_before,
            edges_before,
            ..Default::default()
        }
    }

    pub fn add(&mut self, impact: PassImpact) {
        self.estimated_cost_reduction_pct =
            (self.estimated_cost_reduction_pct + impact.cost_pct).min(MAX_REDUCTION_PCT);
        self.estimated_latency_reduction_pct =
            (self.estimated_latency_reduction_pct + impact.latency_pct).min(MAX_REDUCTION_PCT);
        self.estimated_failure_reduction_pct =
            (self.estimated_failure_reduction_pct + impact.failure_pct).min(MAX_REDUCTION_PCT);
    }
}

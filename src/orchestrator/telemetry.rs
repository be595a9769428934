//! Observability hooks del coordinador
//!
//! - `OrchestrationObserver`: callbacks por etapa, cache y resultado
//! - `TracingObserver`: eventos `tracing` estructurados
//! - `MetricsCollector`: contadores atómicos y percentiles de latencia

use super::clarify::InfoCategory;
use super::error::{OrchestrationError, Stage};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Every hook defaults to a no-op
#[allow(unused_variables)]
pub trait OrchestrationObserver: Send + Sync {
    fn on_cache_hit(&self, key: &str) {}
    fn on_cache_miss(&self, key: &str) {}
    fn on_stage_started(&self, stage: Stage) {}
    fn on_stage_finished(&self, stage: Stage, elapsed: Duration) {}
    fn on_clarification(&self, missing: &[InfoCategory]) {}
    fn on_completed(&self, elapsed: Duration) {}
    fn on_failed(&self, error: &OrchestrationError, elapsed: Duration) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl OrchestrationObserver for TracingObserver {
    fn on_cache_hit(&self, key: &str) {
        tracing::debug!(key = %&key[..key.len().min(12)], "Orchestration cache hit");
    }

    fn on_stage_started(&self, stage: Stage) {
        tracing::debug!(%stage, "Stage started");
    }

    fn on_stage_finished(&self, stage: Stage, elapsed: Duration) {
        tracing::debug!(%stage, elapsed_ms = elapsed.as_millis() as u64, "Stage finished");
    }

    fn on_clarification(&self, missing: &[InfoCategory]) {
        let categories: Vec<&str> = missing.iter().map(|c| c.as_str()).collect();
        tracing::info!(missing = ?categories, "Clarification requested");
    }

    fn on_completed(&self, elapsed: Duration) {
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Orchestration completed");
    }

    fn on_failed(&self, error: &OrchestrationError, elapsed: Duration) {
        match error.stage() {
            Some(stage) => tracing::warn!(%stage, elapsed_ms = elapsed.as_millis() as u64, "Orchestration failed: {}", error),
            None => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Orchestration cancelled"),
        }
    }
}

/// Latencias recientes usadas para percentiles; las más antiguas se descartan
pub const LATENCY_SAMPLE_CAPACITY: usize = 1000;

/// Colector de métricas con contadores atómicos
pub struct MetricsCollector {
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    completed: AtomicUsize,
    clarifications: AtomicUsize,
    cancelled: AtomicUsize,
    total_latency_ms: AtomicU64,
    errors_by_stage: Mutex<HashMap<Stage, usize>>,
    latency_samples: Mutex<VecDeque<u64>>,
    sample_capacity: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::with_sample_capacity(LATENCY_SAMPLE_CAPACITY)
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            clarifications: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            total_latency_ms: AtomicU64::new(0),
            errors_by_stage: Mutex::new(HashMap::new()),
            latency_samples: Mutex::new(VecDeque::with_capacity(capacity)),
            sample_capacity: capacity,
        }
    }

    /// Cache hit rate (0.0 - 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let completed = self.completed.load(Ordering::Relaxed);
        if completed == 0 {
            0.0
        } else {
            self.total_latency_ms.load(Ordering::Relaxed) as f64 / completed as f64
        }
    }

    /// Percentiles de latencia (p50, p95, p99)
    pub fn latency_percentiles(&self) -> LatencyPercentiles {
        let mut samples: Vec<u64> = self
            .latency_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        if samples.is_empty() {
            return LatencyPercentiles::default();
        }

        samples.sort_unstable();
        let count = samples.len();
        let at = |q: f64| samples[((count as f64 * q) as usize).min(count - 1)];
        LatencyPercentiles {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            count,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let errors_by_stage = self
            .errors_by_stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(stage, count)| (stage.as_str().to_string(), *count))
            .collect();

        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_hit_rate: self.cache_hit_rate(),
            completed: self.completed.load(Ordering::Relaxed),
            clarifications: self.clarifications.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            latency_percentiles: self.latency_percentiles(),
            errors_by_stage,
        }
    }
}

impl OrchestrationObserver for MetricsCollector {
    fn on_cache_hit(&self, _key: &str) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cache_miss(&self, _key: &str) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn on_clarification(&self, _missing: &[InfoCategory]) {
        self.clarifications.fetch_add(1, Ordering::Relaxed);
    }

    fn on_completed(&self, elapsed: Duration) {
        let latency_ms = elapsed.as_millis() as u64;
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        let mut samples = self
            .latency_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if samples.len() == self.sample_capacity {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    fn on_failed(&self, error: &OrchestrationError, _elapsed: Duration) {
        match error.stage() {
            Some(stage) => {
                *self
                    .errors_by_stage
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(stage)
                    .or_insert(0) += 1;
            }
            None => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub completed: usize,
    pub clarifications: usize,
    pub cancelled: usize,
    pub avg_latency_ms: f64,
    pub latency_percentiles: LatencyPercentiles,
    pub errors_by_stage: HashMap<String, usize>,
}

impl MetricsSnapshot {
    /// Reporte legible
    pub fn report(&self) -> String {
        let mut lines = vec![
            "Orchestration metrics".to_string(),
            format!(
                "  Cache: {}/{} hits ({:.1}% rate)",
                self.cache_hits,
                self.cache_hits + self.cache_misses,
                self.cache_hit_rate * 100.0
            ),
            format!(
                "  Requests: {} completed, {} clarifications, {} cancelled, {:.1}ms avg",
                self.completed, self.clarifications, self.cancelled, self.avg_latency_ms
            ),
            format!(
                "  Latency: p50={}ms, p95={}ms, p99={}ms ({} samples)",
                self.latency_percentiles.p50,
                self.latency_percentiles.p95,
                self.latency_percentiles.p99,
                self.latency_percentiles.count
            ),
        ];

        if !self.errors_by_stage.is_empty() {
            lines.push("  Errors:".to_string());
            let mut sorted: Vec<_> = self.errors_by_stage.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (stage, count) in sorted {
                lines.push(format!("    - {}: {}", stage, count));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_and_percentiles() {
        let metrics = MetricsCollector::new();
        metrics.on_cache_miss("k");
        metrics.on_cache_hit("k");
        metrics.on_cache_hit("k");
        metrics.on_cache_hit("k");
        for ms in [10, 20, 30, 40] {
            metrics.on_completed(Duration::from_millis(ms));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hit_rate, 0.75);
        assert_eq!(snapshot.avg_latency_ms, 25.0);
        assert_eq!(snapshot.latency_percentiles.p50, 30);
        assert_eq!(snapshot.latency_percentiles.p99, 40);
    }

    #[test]
    fn test_latency_samples_are_bounded() {
        let metrics = MetricsCollector::with_sample_capacity(3);
        for ms in [500, 10, 20, 30] {
            metrics.on_completed(Duration::from_millis(ms));
        }

        let percentiles = metrics.latency_percentiles();
        assert_eq!(percentiles.count, 3);
        // the 500ms outlier was the oldest and got dropped
        assert_eq!(percentiles.p99, 30);
        assert_eq!(metrics.snapshot().completed, 4);
    }

    #[test]
    fn test_errors_grouped_by_stage() {
        let metrics = MetricsCollector::new();
        let failure = OrchestrationError::at(Stage::Optimize, anyhow::anyhow!("x"));
        metrics.on_failed(&failure, Duration::ZERO);
        metrics.on_failed(&failure, Duration::ZERO);
        metrics.on_failed(&OrchestrationError::Cancelled, Duration::ZERO);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.errors_by_stage["optimize"], 2);
        assert_eq!(snapshot.cancelled, 1);
        assert!(snapshot.report().contains("optimize: 2"));
    }
}

//! Rolling latency samples per provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples kept per provider
pub const DEFAULT_SAMPLE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub provider_id: String,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    pub fn now(provider_id: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            provider_id: provider_id.into(),
            latency_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded ring buffer, oldest samples are dropped first
#[derive(Debug, Clone)]
pub struct PerformanceBuffer {
    samples: VecDeque<PerformanceSample>,
    capacity: usize,
}

impl PerformanceBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: PerformanceSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Average latency of the newest `window` samples
    pub fn recent_average(&self, window: usize) -> Option<f64> {
        if self.samples.is_empty() || window == 0 {
            return None;
        }
        let taken: Vec<f64> = self
            .samples
            .iter()
            .rev()
            .take(window)
            .map(|s| s.latency_ms)
            .collect();
        Some(taken.iter().sum::<f64>() / taken.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }
}

impl Default for PerformanceBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY)
    }
}

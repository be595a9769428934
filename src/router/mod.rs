//! Provider Router - selección de proveedor con restricciones
//!
//! Filters the registry down to providers that satisfy every hard
//! constraint of a [`RoutingRequest`], scores the survivors and picks the
//! best one. On a failed provider call exactly one fallback hop is tried,
//! on a different backend with the closest quality profile.
//!
//! Selection is a pure function of the registry snapshot and the request:
//! identical inputs always produce the identical [`RoutingDecision`].

mod error;

pub use error::{EliminatingConstraint, RouterError};

use crate::registry::{
    Feature, ProviderProfile, ProviderRegistry, ProviderStatus, QualityDimension, RegistrySnapshot,
};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const PREFERENCE_WEIGHT: f64 = 10.0;
const QUALITY_WEIGHT: f64 = 5.0;
const COST_WEIGHT: f64 = 2.0;
const RECENT_PERFORMANCE_BONUS: f64 = 1.0;

/// Samples considered for the recent-performance bonus
pub const DEFAULT_PERFORMANCE_WINDOW: usize = 10;

/// Rough characters-per-unit ratio used to size a request
const CHARS_PER_UNIT: usize = 4;

/// Hard constraints of a routing request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConstraints {
    /// Ceiling on the estimated request cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    /// Ceiling on time-to-first-token, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<f64>,
    /// Compare `min_quality` against one axis instead of the mean
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_dimension: Option<QualityDimension>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_features: BTreeSet<Feature>,
}

impl RoutingConstraints {
    pub fn is_empty(&self) -> bool {
        self.max_cost.is_none()
            && self.max_latency_ms.is_none()
            && self.min_quality.is_none()
            && self.required_features.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingRequest {
    pub task: String,
    /// Ordered list of preferred provider ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_providers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<RoutingConstraints>,
}

impl RoutingRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub provider_id: String,
    pub score: f64,
}

/// Value produced by a provider call routed through [`Router::execute_with_fallback`]
#[derive(Debug, Clone)]
pub struct RoutedOutput<T> {
    pub value: T,
    pub provider_id: String,
    pub used_fallback: bool,
}

/// Estimated size of a request in units (tokens)
pub fn estimate_units(task: &str) -> u64 {
    let chars = task.chars().count();
    chars.div_ceil(CHARS_PER_UNIT).max(1) as u64
}

/// Estimated cost of a request: billed in whole 1K-unit blocks, minimum one block
pub fn estimate_cost(profile: &ProviderProfile, units: u64) -> f64 {
    let blocks = units.max(1).div_ceil(1000);
    blocks as f64 * profile.cost.output
}

enum CallFailure {
    Cancelled,
    Failed(String),
}

/// Scores and selects providers from a shared registry
#[derive(Clone)]
pub struct Router {
    registry: Arc<ProviderRegistry>,
    performance_window: usize,
}

impl Router {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            performance_window: DEFAULT_PERFORMANCE_WINDOW,
        }
    }

    pub fn with_performance_window(mut self, window: usize) -> Self {
        self.performance_window = window.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Pick the highest-scoring eligible provider
    pub fn select_provider(&self, request: &RoutingRequest) -> Result<RoutingDecision, RouterError> {
        let ranked = self.rank(request)?;
        let decision = ranked
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::no_suitable(EliminatingConstraint::EmptyPool, String::new()))?;
        tracing::debug!(
            provider = %decision.provider_id,
            score = decision.score,
            "Provider selected"
        );
        Ok(decision)
    }

    /// Every eligible provider, best first
    pub fn rank(&self, request: &RoutingRequest) -> Result<Vec<RoutingDecision>, RouterError> {
        let snapshot = self.registry.snapshot(self.performance_window);
        let candidates = eligible_candidates(&snapshot, request)?;

        let mut decisions: Vec<RoutingDecision> = candidates
            .into_iter()
            .map(|status| RoutingDecision {
                provider_id: status.profile.id.clone(),
                score: score(status, request),
            })
            .collect();
        decisions.sort_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then_with(|| a.provider_id.cmp(&b.provider_id))
        });
        Ok(decisions)
    }

    /// Best fallback for a failed provider: eligible, on another backend,
    /// with the closest quality vector
    pub fn select_fallback(
        &self,
        failed_id: &str,
        request: &RoutingRequest,
    ) -> Option<Arc<ProviderProfile>> {
        let snapshot = self.registry.snapshot(self.performance_window);
        let failed = snapshot.get(failed_id)?.profile.clone();
        let candidates = eligible_candidates(&snapshot, request).ok()?;

        candidates
            .into_iter()
            .filter(|status| status.profile.backend != failed.backend)
            .min_by(|a, b| {
                OrderedFloat(a.profile.quality.distance(&failed.quality))
                    .cmp(&OrderedFloat(b.profile.quality.distance(&failed.quality)))
                    .then_with(|| a.profile.id.cmp(&b.profile.id))
            })
            .map(|status| status.profile.clone())
    }

    /// Run `call` against the selected provider, with at most one fallback hop.
    ///
    /// Each attempt is bounded by `timeout` and aborted when `cancel` fires.
    /// When the fallback also fails, the error of the first provider is returned.
    pub async fn execute_with_fallback<T, F, Fut>(
        &self,
        request: &RoutingRequest,
        timeout: Duration,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<RoutedOutput<T>, RouterError>
    where
        F: Fn(Arc<ProviderProfile>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let decision = self.select_provider(request)?;
        let primary = self.registry.profile(&decision.provider_id).ok_or_else(|| {
            RouterError::no_suitable(
                EliminatingConstraint::Availability,
                format!("{} disappeared from the registry", decision.provider_id),
            )
        })?;

        let message = match self.invoke(&primary, timeout, cancel, &call).await {
            Ok(value) => {
                return Ok(RoutedOutput {
                    value,
                    provider_id: primary.id.clone(),
                    used_fallback: false,
                })
            }
            Err(CallFailure::Cancelled) => return Err(RouterError::Cancelled),
            Err(CallFailure::Failed(message)) => message,
        };

        tracing::warn!(provider = %primary.id, "Provider call failed: {}", message);
        let original = RouterError::ProviderCall {
            provider_id: primary.id.clone(),
            message,
        };

        let Some(fallback) = self.select_fallback(&primary.id, request) else {
            tracing::warn!(provider = %primary.id, "No fallback provider on another backend");
            return Err(original);
        };

        tracing::info!(from = %primary.id, to = %fallback.id, "Retrying on fallback provider");
        match self.invoke(&fallback, timeout, cancel, &call).await {
            Ok(value) => Ok(RoutedOutput {
                value,
                provider_id: fallback.id.clone(),
                used_fallback: true,
            }),
            Err(CallFailure::Cancelled) => Err(RouterError::Cancelled),
            Err(CallFailure::Failed(message)) => {
                tracing::warn!(provider = %fallback.id, "Fallback call failed: {}", message);
                Err(original)
            }
        }
    }

    async fn invoke<T, F, Fut>(
        &self,
        profile: &Arc<ProviderProfile>,
        timeout: Duration,
        cancel: &CancellationToken,
        call: &F,
    ) -> Result<T, CallFailure>
    where
        F: Fn(Arc<ProviderProfile>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
            outcome = tokio::time::timeout(timeout, call(profile.clone())) => outcome,
        };

        match outcome {
            Ok(Ok(value)) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                if let Err(e) = self.registry.record_sample(&profile.id, latency_ms) {
                    tracing::debug!("Performance sample dropped: {}", e);
                }
                Ok(value)
            }
            Ok(Err(e)) => Err(CallFailure::Failed(e.to_string())),
            Err(_) => Err(CallFailure::Failed(format!(
                "timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

/// Apply the hard filters in a fixed order, naming the one that empties the set
fn eligible_candidates<'a>(
    snapshot: &'a RegistrySnapshot,
    request: &RoutingRequest,
) -> Result<Vec<&'a ProviderStatus>, RouterError> {
    if snapshot.is_empty() {
        return Err(RouterError::no_suitable(
            EliminatingConstraint::EmptyPool,
            String::new(),
        ));
    }

    let mut candidates: Vec<&ProviderStatus> = snapshot.available().collect();
    if candidates.is_empty() {
        return Err(RouterError::no_suitable(
            EliminatingConstraint::Availability,
            format!("0 of {} providers available", snapshot.len()),
        ));
    }

    let Some(constraints) = &request.constraints else {
        return Ok(candidates);
    };

    if !constraints.required_features.is_empty() {
        candidates.retain(|s| {
            constraints
                .required_features
                .iter()
                .all(|f| s.profile.features.supports(*f))
        });
        if candidates.is_empty() {
            let features: Vec<Feature> = constraints.required_features.iter().copied().collect();
            return Err(RouterError::no_suitable(
                EliminatingConstraint::RequiredFeatures(features),
                "no available provider supports them".to_string(),
            ));
        }
    }

    if let Some(max_cost) = constraints.max_cost {
        let units = estimate_units(&request.task);
        candidates.retain(|s| estimate_cost(&s.profile, units) <= max_cost);
        if candidates.is_empty() {
            return Err(RouterError::no_suitable(
                EliminatingConstraint::MaxCost,
                format!("limit {}", max_cost),
            ));
        }
    }

    if let Some(max_latency) = constraints.max_latency_ms {
        candidates.retain(|s| s.profile.latency.time_to_first_token_ms <= max_latency);
        if candidates.is_empty() {
            return Err(RouterError::no_suitable(
                EliminatingConstraint::MaxLatency,
                format!("limit {}ms", max_latency),
            ));
        }
    }

    if let Some(min_quality) = constraints.min_quality {
        candidates.retain(|s| s.profile.quality_score(constraints.quality_dimension) >= min_quality);
        if candidates.is_empty() {
            return Err(RouterError::no_suitable(
                EliminatingConstraint::MinQuality,
                format!("minimum {}", min_quality),
            ));
        }
    }

    Ok(candidates)
}

fn score(status: &ProviderStatus, request: &RoutingRequest) -> f64 {
    let profile = &status.profile;
    let preferred = if request.preferred_providers.iter().any(|p| p == &profile.id) {
        1.0
    } else {
        0.0
    };
    let bonus = match status.recent_latency_ms {
        Some(recent) if recent < profile.latency.time_to_first_token_ms => RECENT_PERFORMANCE_BONUS,
        _ => 0.0,
    };

    PREFERENCE_WEIGHT * preferred + QUALITY_WEIGHT * profile.quality.mean()
        - COST_WEIGHT * profile.cost.output
        - profile.latency.time_to_first_token_ms / 1000.0
        + bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FeatureFlags, QualityVector};

    fn provider(id: &str, backend: &str, cost: f64, quality: f64) -> ProviderProfile {
        ProviderProfile::new(id, backend)
            .with_cost(cost, cost)
            .with_quality(QualityVector::uniform(quality))
            .with_latency(500.0, 50.0)
    }

    fn router(profiles: Vec<ProviderProfile>) -> Router {
        let registry = ProviderRegistry::from_profiles(profiles, 100).unwrap();
        Router::new(Arc::new(registry))
    }

    #[test]
    fn test_estimate_units_rounds_up() {
        assert_eq!(estimate_units(""), 1);
        assert_eq!(estimate_units("abcde"), 2);
        assert_eq!(estimate_units(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn test_estimate_cost_uses_whole_blocks() {
        let profile = provider("p", "b", 0.002, 0.5);
        assert_eq!(estimate_cost(&profile, 10), 0.002);
        assert_eq!(estimate_cost(&profile, 1500), 0.004);
        // one unit past a block boundary bills the next block
        let profile = provider("q", "b", 0.006, 0.5);
        assert_eq!(estimate_cost(&profile, 1000), 0.006);
        assert_eq!(estimate_cost(&profile, 1001), 0.012);
    }

    #[test]
    fn test_preference_dominates_quality() {
        let router = router(vec![
            provider("best", "a", 0.001, 0.95),
            provider("liked", "b", 0.001, 0.6),
        ]);
        let request = RoutingRequest::new("hello").with_preferred(vec!["liked".to_string()]);
        assert_eq!(router.select_provider(&request).unwrap().provider_id, "liked");
    }

    #[test]
    fn test_ties_broken_by_id() {
        let router = router(vec![
            provider("zeta", "a", 0.001, 0.8),
            provider("alpha", "b", 0.001, 0.8),
        ]);
        let decision = router.select_provider(&RoutingRequest::new("task")).unwrap();
        assert_eq!(decision.provider_id, "alpha");
    }

    #[test]
    fn test_recent_performance_bonus() {
        let router = router(vec![
            provider("a", "x", 0.001, 0.8),
            provider("b", "y", 0.001, 0.8),
        ]);
        for _ in 0..10 {
            router.registry().record_sample("b", 100.0).unwrap();
        }
        let ranked = router.rank(&RoutingRequest::new("task")).unwrap();
        assert_eq!(ranked[0].provider_id, "b");
        assert!((ranked[0].score - ranked[1].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_required_feature_named_in_error() {
        let router = router(vec![provider("a", "x", 0.001, 0.8)]);
        let request = RoutingRequest::new("look at this").with_constraints(RoutingConstraints {
            required_features: [Feature::Vision].into_iter().collect(),
            ..Default::default()
        });
        match router.select_provider(&request) {
            Err(RouterError::NoSuitableProvider { constraint, reason }) => {
                assert_eq!(constraint, EliminatingConstraint::RequiredFeatures(vec![Feature::Vision]));
                assert!(reason.contains("vision"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_feature_filter_keeps_capable_provider() {
        let router = router(vec![
            provider("plain", "x", 0.001, 0.9),
            provider("eyes", "y", 0.001, 0.7).with_features(FeatureFlags::all()),
        ]);
        let request = RoutingRequest::new("describe image").with_constraints(RoutingConstraints {
            required_features: [Feature::Vision].into_iter().collect(),
            ..Default::default()
        });
        assert_eq!(router.select_provider(&request).unwrap().provider_id, "eyes");
    }

    #[test]
    fn test_latency_filter() {
        let router = router(vec![
            provider("slow", "x", 0.001, 0.9).with_latency(3000.0, 20.0),
            provider("quick", "y", 0.001, 0.7).with_latency(200.0, 90.0),
        ]);
        let request = RoutingRequest::new("hi").with_constraints(RoutingConstraints {
            max_latency_ms: Some(1000.0),
            ..Default::default()
        });
        assert_eq!(router.select_provider(&request).unwrap().provider_id, "quick");
    }

    #[test]
    fn test_quality_dimension_filter() {
        let router = router(vec![
            provider("generalist", "x", 0.001, 0.7),
            provider("thinker", "y", 0.001, 0.5)
                .with_quality(QualityVector::new(0.95, 0.3, 0.4, 0.4)),
        ]);
        let request = RoutingRequest::new("prove it").with_constraints(RoutingConstraints {
            min_quality: Some(0.9),
            quality_dimension: Some(QualityDimension::Reasoning),
            ..Default::default()
        });
        assert_eq!(router.select_provider(&request).unwrap().provider_id, "thinker");
    }

    #[test]
    fn test_unavailable_providers_are_skipped() {
        let router = router(vec![
            provider("a", "x", 0.001, 0.9),
            provider("b", "y", 0.001, 0.5),
        ]);
        router.registry().set_available("a", false).unwrap();
        assert_eq!(
            router.select_provider(&RoutingRequest::new("t")).unwrap().provider_id,
            "b"
        );
        router.registry().set_available("b", false).unwrap();
        assert!(matches!(
            router.select_provider(&RoutingRequest::new("t")),
            Err(RouterError::NoSuitableProvider {
                constraint: EliminatingConstraint::Availability,
                ..
            })
        ));
    }

    #[test]
    fn test_fallback_prefers_other_backend_closest_quality() {
        let router = router(vec![
            provider("openai/a", "openai", 0.01, 0.9),
            provider("openai/b", "openai", 0.01, 0.9),
            provider("anthropic/c", "anthropic", 0.01, 0.85),
            provider("groq/d", "groq", 0.01, 0.4),
        ]);
        let fallback = router
            .select_fallback("openai/a", &RoutingRequest::new("t"))
            .unwrap();
        assert_eq!(fallback.id, "anthropic/c");
    }

    #[test]
    fn test_no_fallback_on_single_backend() {
        let router = router(vec![
            provider("openai/a", "openai", 0.01, 0.9),
            provider("openai/b", "openai", 0.01, 0.8),
        ]);
        assert!(router
            .select_fallback("openai/a", &RoutingRequest::new("t"))
            .is_none());
    }
}

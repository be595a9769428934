//! Provider Registry - tabla sincronizada de proveedores
//!
//! Holds every registered [`ProviderProfile`] together with its live
//! availability flag and its ring buffer of [`PerformanceSample`]s.
//! Health checks and in-flight routing decisions run concurrently, so all
//! state sits behind a single lock and callers only ever see immutable
//! [`RegistrySnapshot`]s.

pub mod global;
pub mod health;
pub mod performance;
pub mod profile;

pub use health::{
    EnvCredentialSource, HealthMonitor, HealthReport, HealthSource, HttpHealthCheck,
    ProviderHealth,
};
pub use performance::{PerformanceBuffer, PerformanceSample, DEFAULT_SAMPLE_CAPACITY};
pub use profile::{
    CostPer1k, Feature, FeatureFlags, LatencyProfile, ProviderProfile, QualityDimension,
    QualityVector,
};

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("Invalid provider profile: {0}")]
    InvalidProfile(String),

    #[error("Global registry already initialized")]
    AlreadyInitialized,
}

struct ProviderEntry {
    profile: Arc<ProviderProfile>,
    available: bool,
    samples: PerformanceBuffer,
}

/// Point-in-time view of one provider
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub profile: Arc<ProviderProfile>,
    pub available: bool,
    /// Rolling average over the requested sample window, if any samples exist
    pub recent_latency_ms: Option<f64>,
}

/// Immutable copy of the registry, ordered by provider id
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    providers: Vec<ProviderStatus>,
}

impl RegistrySnapshot {
    pub fn providers(&self) -> &[ProviderStatus] {
        &self.providers
    }

    pub fn get(&self, id: &str) -> Option<&ProviderStatus> {
        self.providers.iter().find(|p| p.profile.id == id)
    }

    pub fn available(&self) -> impl Iterator<Item = &ProviderStatus> {
        self.providers.iter().filter(|p| p.available)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Synchronized provider table
pub struct ProviderRegistry {
    state: RwLock<BTreeMap<String, ProviderEntry>>,
    sample_capacity: usize,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::with_sample_capacity(DEFAULT_SAMPLE_CAPACITY)
    }

    pub fn with_sample_capacity(sample_capacity: usize) -> Self {
        Self {
            state: RwLock::new(BTreeMap::new()),
            sample_capacity,
        }
    }

    /// Build a registry from static configuration; every profile starts available
    pub fn from_profiles(
        profiles: impl IntoIterator<Item = ProviderProfile>,
        sample_capacity: usize,
    ) -> Result<Self, RegistryError> {
        let registry = Self::with_sample_capacity(sample_capacity);
        for profile in profiles {
            registry.register(profile)?;
        }
        Ok(registry)
    }

    pub fn register(&self, profile: ProviderProfile) -> Result<(), RegistryError> {
        self.register_with_availability(profile, true)
    }

    pub fn register_with_availability(
        &self,
        profile: ProviderProfile,
        available: bool,
    ) -> Result<(), RegistryError> {
        profile.validate().map_err(RegistryError::InvalidProfile)?;

        let mut state = self.write();
        if state.contains_key(&profile.id) {
            return Err(RegistryError::DuplicateProvider(profile.id));
        }
        tracing::debug!(provider = %profile.id, backend = %profile.backend, "Registered provider");
        state.insert(
            profile.id.clone(),
            ProviderEntry {
                profile: Arc::new(profile),
                available,
                samples: PerformanceBuffer::new(self.sample_capacity),
            },
        );
        Ok(())
    }

    pub fn profile(&self, id: &str) -> Option<Arc<ProviderProfile>> {
        self.read().get(id).map(|e| e.profile.clone())
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.read().get(id).map(|e| e.available).unwrap_or(false)
    }

    pub fn set_available(&self, id: &str, available: bool) -> Result<(), RegistryError> {
        let mut state = self.write();
        let entry = state
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownProvider(id.to_string()))?;
        if entry.available != available {
            tracing::info!(provider = %id, available, "Provider availability changed");
        }
        entry.available = available;
        Ok(())
    }

    pub fn record_sample(&self, id: &str, latency_ms: f64) -> Result<(), RegistryError> {
        let mut state = self.write();
        let entry = state
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownProvider(id.to_string()))?;
        entry.samples.push(PerformanceSample::now(id, latency_ms));
        Ok(())
    }

    pub fn recent_average_latency(&self, id: &str, window: usize) -> Option<f64> {
        self.read()
            .get(id)
            .and_then(|e| e.samples.recent_average(window))
    }

    pub fn sample_count(&self, id: &str) -> usize {
        self.read().get(id).map(|e| e.samples.len()).unwrap_or(0)
    }

    /// Copy of all profiles with availability and the rolling latency over `window`
    pub fn snapshot(&self, window: usize) -> RegistrySnapshot {
        let state = self.read();
        RegistrySnapshot {
            providers: state
                .values()
                .map(|entry| ProviderStatus {
                    profile: entry.profile.clone(),
                    available: entry.available,
                    recent_latency_ms: entry.samples.recent_average(window),
                })
                .collect(),
        }
    }

    pub fn profiles(&self) -> Vec<Arc<ProviderProfile>> {
        self.read().values().map(|e| e.profile.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave an entry half-written,
    // so poisoned guards are safe to reuse.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ProviderEntry>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ProviderEntry>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> ProviderProfile {
        ProviderProfile::new(id, "test").with_cost(0.001, 0.002)
    }

    #[test]
    fn test_register_and_snapshot_sorted_by_id() {
        let registry = ProviderRegistry::new();
        registry.register(profile("b")).unwrap();
        registry.register(profile("a")).unwrap();

        let snapshot = registry.snapshot(10);
        let ids: Vec<_> = snapshot.providers().iter().map(|p| p.profile.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(snapshot.providers().iter().all(|p| p.available));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = ProviderRegistry::new();
        registry.register(profile("a")).unwrap();
        assert_eq!(
            registry.register(profile("a")),
            Err(RegistryError::DuplicateProvider("a".to_string()))
        );
    }

    #[test]
    fn test_availability_toggle() {
        let registry = ProviderRegistry::new();
        registry.register(profile("a")).unwrap();
        registry.set_available("a", false).unwrap();
        assert!(!registry.is_available("a"));
        assert_eq!(registry.snapshot(10).available().count(), 0);
        assert!(registry.set_available("missing", true).is_err());
    }

    #[test]
    fn test_samples_bounded_by_capacity() {
        let registry = ProviderRegistry::with_sample_capacity(5);
        registry.register(profile("a")).unwrap();
        for i in 0..12 {
            registry.record_sample("a", i as f64).unwrap();
        }
        assert_eq!(registry.sample_count("a"), 5);
        assert_eq!(registry.recent_average_latency("a", 2), Some(10.5));
    }

    #[test]
    fn test_concurrent_samples_and_toggles() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(profile("a")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.record_sample("a", (i * j) as f64).unwrap();
                        registry.set_available("a", j % 2 == 0).unwrap();
                        let _ = registry.snapshot(10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.sample_count("a"), DEFAULT_SAMPLE_CAPACITY);
    }
}

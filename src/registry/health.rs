//! Periodic health checks that re-derive provider availability
//!
//! A [`HealthMonitor`] ticks on its own schedule and asks a
//! [`HealthSource`] about every registered provider. A provider without a
//! credential is never available.

use super::{ProviderProfile, ProviderRegistry};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of a single health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderHealth {
    Healthy,
    MissingCredential,
    Unreachable(String),
}

impl ProviderHealth {
    pub fn is_available(&self) -> bool {
        matches!(self, ProviderHealth::Healthy)
    }
}

/// External credential/health collaborator
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn check(&self, profile: &ProviderProfile) -> ProviderHealth;
}

/// Resolves credentials from the environment.
///
/// The credential reference is `profile.credential` or, when absent,
/// `<BACKEND>_API_KEY`. References that look like env var names
/// (uppercase and underscores) are read from the environment, anything else
/// is taken as a literal key.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialSource;

impl EnvCredentialSource {
    pub fn new() -> Self {
        Self
    }

    pub fn credential_ref(profile: &ProviderProfile) -> String {
        profile.credential.clone().unwrap_or_else(|| {
            format!(
                "{}_API_KEY",
                profile.backend.to_uppercase().replace(['-', '.', ' '], "_")
            )
        })
    }

    pub fn resolve(&self, profile: &ProviderProfile) -> Option<String> {
        let reference = Self::credential_ref(profile);
        let looks_like_env = reference
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        let value = if looks_like_env {
            std::env::var(&reference).ok()
        } else {
            Some(reference)
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

#[async_trait]
impl HealthSource for EnvCredentialSource {
    async fn check(&self, profile: &ProviderProfile) -> ProviderHealth {
        match self.resolve(profile) {
            Some(_) => ProviderHealth::Healthy,
            None => ProviderHealth::MissingCredential,
        }
    }
}

/// Credential check plus a `GET {base_url}/models` request for providers with a base URL
pub struct HttpHealthCheck {
    client: Client,
    credentials: EnvCredentialSource,
}

impl HttpHealthCheck {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            credentials: EnvCredentialSource::new(),
        }
    }
}

#[async_trait]
impl HealthSource for HttpHealthCheck {
    async fn check(&self, profile: &ProviderProfile) -> ProviderHealth {
        let Some(api_key) = self.credentials.resolve(profile) else {
            return ProviderHealth::MissingCredential;
        };
        let Some(base_url) = &profile.base_url else {
            return ProviderHealth::Healthy;
        };

        let url = format!("{}/models", base_url.trim_end_matches('/'));
        let response = match self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return ProviderHealth::Unreachable(e.to_string()),
        };

        if response.status() == 401 {
            return ProviderHealth::Unreachable("invalid credential".to_string());
        }
        if !response.status().is_success() {
            return ProviderHealth::Unreachable(format!("HTTP {}", response.status()));
        }
        ProviderHealth::Healthy
    }
}

/// Result of one health-check round
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub available: Vec<String>,
    pub unavailable: Vec<(String, ProviderHealth)>,
}

/// Health-check loop over a shared registry
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    source: Arc<dyn HealthSource>,
    interval: Duration,
    check_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        source: Arc<dyn HealthSource>,
        interval: Duration,
        check_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            interval,
            check_timeout,
        }
    }

    /// Check every provider once and write the availability flags back
    pub async fn run_once(&self) -> HealthReport {
        let profiles = self.registry.profiles();
        let checks = profiles.iter().map(|profile| {
            let source = self.source.clone();
            let check_timeout = self.check_timeout;
            async move {
                match tokio::time::timeout(check_timeout, source.check(profile)).await {
                    Ok(health) => health,
                    Err(_) => ProviderHealth::Unreachable("health check timed out".to_string()),
                }
            }
        });
        let results = join_all(checks).await;

        let mut report = HealthReport::default();
        for (profile, health) in profiles.iter().zip(results) {
            let available = health.is_available();
            if let Err(e) = self.registry.set_available(&profile.id, available) {
                tracing::warn!(provider = %profile.id, "Health update skipped: {}", e);
                continue;
            }
            if available {
                report.available.push(profile.id.clone());
            } else {
                tracing::debug!(provider = %profile.id, ?health, "Provider unavailable");
                report.unavailable.push((profile.id.clone(), health));
            }
        }
        report
    }

    /// Run the loop until `cancel` fires. The first round runs immediately.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        tracing::debug!(
                            available = report.available.len(),
                            unavailable = report.unavailable.len(),
                            "Health check round finished"
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FixedHealth {
        healthy: HashSet<String>,
    }

    #[async_trait]
    impl HealthSource for FixedHealth {
        async fn check(&self, profile: &ProviderProfile) -> ProviderHealth {
            if self.healthy.contains(&profile.id) {
                ProviderHealth::Healthy
            } else {
                ProviderHealth::MissingCredential
            }
        }
    }

    struct SlowHealth;

    #[async_trait]
    impl HealthSource for SlowHealth {
        async fn check(&self, _profile: &ProviderProfile) -> ProviderHealth {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ProviderHealth::Healthy
        }
    }

    fn registry() -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new();
        registry.register(ProviderProfile::new("a", "x")).unwrap();
        registry.register(ProviderProfile::new("b", "y")).unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_run_once_updates_availability() {
        let registry = registry();
        let source = Arc::new(FixedHealth {
            healthy: ["a".to_string()].into_iter().collect(),
        });
        let monitor = HealthMonitor::new(
            registry.clone(),
            source,
            Duration::from_secs(30),
            Duration::from_secs(1),
        );

        let report = monitor.run_once().await;
        assert_eq!(report.available, vec!["a".to_string()]);
        assert!(registry.is_available("a"));
        assert!(!registry.is_available("b"));
    }

    #[tokio::test]
    async fn test_timed_out_check_marks_unavailable() {
        let registry = registry();
        let monitor = HealthMonitor::new(
            registry.clone(),
            Arc::new(SlowHealth),
            Duration::from_secs(30),
            Duration::from_millis(20),
        );
        let report = monitor.run_once().await;
        assert_eq!(report.unavailable.len(), 2);
        assert!(!registry.is_available("a"));
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_cancel() {
        let registry = registry();
        let monitor = HealthMonitor::new(
            registry.clone(),
            Arc::new(FixedHealth {
                healthy: HashSet::new(),
            }),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let cancel = CancellationToken::new();
        let handle = monitor.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(!registry.is_available("a"));
    }

    #[tokio::test]
    async fn test_literal_credential_counts_as_present() {
        let source = EnvCredentialSource::new();
        let with_literal = ProviderProfile::new("local", "ollama").with_credential("local-key");
        assert_eq!(source.check(&with_literal).await, ProviderHealth::Healthy);

        let missing = ProviderProfile::new("m", "backend")
            .with_credential("FLOWPLAN_TEST_SURELY_UNSET_KEY");
        assert_eq!(source.check(&missing).await, ProviderHealth::MissingCredential);
    }

    #[test]
    fn test_default_credential_ref_from_backend() {
        let profile = ProviderProfile::new("x", "open-ai");
        assert_eq!(EnvCredentialSource::credential_ref(&profile), "OPEN_AI_API_KEY");
    }
}

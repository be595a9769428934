//! Router integration tests: selection under hard constraints and
//! fallback-guarded execution against mock provider calls

use flowplan::registry::{
    EnvCredentialSource, Feature, FeatureFlags, HealthMonitor, ProviderProfile, ProviderRegistry,
    QualityVector,
};
use flowplan::router::{
    estimate_cost, estimate_units, EliminatingConstraint, Router, RouterError, RoutingConstraints,
    RoutingRequest,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn provider(id: &str, backend: &str, cost: f64, quality: f64) -> ProviderProfile {
    ProviderProfile::new(id, backend)
        .with_cost(cost, cost)
        .with_quality(QualityVector::uniform(quality))
        .with_latency(400.0, 60.0)
}

fn router_with(profiles: Vec<ProviderProfile>) -> Router {
    let registry = ProviderRegistry::from_profiles(profiles, 100).expect("valid profiles");
    Router::new(Arc::new(registry))
}

#[test]
fn test_cost_ceiling_picks_cheaper_provider() {
    let router = router_with(vec![
        provider("p1", "openai", 0.03, 0.95),
        provider("p2", "anthropic", 0.001, 0.85),
    ]);

    let request = RoutingRequest::new("Summarize this report").with_constraints(RoutingConstraints {
        max_cost: Some(0.01),
        min_quality: Some(0.8),
        ..Default::default()
    });

    let decision = router.select_provider(&request).unwrap();
    assert_eq!(decision.provider_id, "p2");
}

#[test]
fn test_empty_pool_is_reported() {
    let router = Router::new(Arc::new(ProviderRegistry::new()));
    let err = router
        .select_provider(&RoutingRequest::new("anything"))
        .unwrap_err();

    match err {
        RouterError::NoSuitableProvider { constraint, .. } => {
            assert_eq!(constraint, EliminatingConstraint::EmptyPool);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_eliminating_constraint_is_named() {
    let router = router_with(vec![
        provider("p1", "openai", 0.03, 0.95),
        provider("p2", "anthropic", 0.02, 0.85),
    ]);
    let request = RoutingRequest::new("short task").with_constraints(RoutingConstraints {
        max_cost: Some(0.001),
        ..Default::default()
    });

    let err = router.select_provider(&request).unwrap_err();
    assert!(matches!(
        err,
        RouterError::NoSuitableProvider {
            constraint: EliminatingConstraint::MaxCost,
            ..
        }
    ));
    assert!(err.to_string().contains("max_cost"));
}

#[test]
fn test_selection_always_satisfies_hard_constraints() {
    let mut profiles = Vec::new();
    for (i, backend) in ["openai", "anthropic", "google"].iter().enumerate() {
        for j in 0..4 {
            let cost = 0.0005 * (1 + i * 4 + j) as f64;
            let quality = 0.6 + 0.03 * (i * 4 + j) as f64;
            let features = FeatureFlags {
                streaming: j % 2 == 0,
                function_calling: i != 1,
                vision: j == 3,
            };
            profiles.push(
                ProviderProfile::new(format!("{}-{}", backend, j), *backend)
                    .with_cost(cost, cost)
                    .with_quality(QualityVector::uniform(quality))
                    .with_latency(200.0 + 150.0 * j as f64, 50.0)
                    .with_features(features),
            );
        }
    }
    let router = router_with(profiles);
    let task = "Classify incoming support tickets by urgency";
    let units = estimate_units(task);

    for max_cost in [None, Some(0.002), Some(0.004)] {
        for max_latency in [None, Some(400.0), Some(700.0)] {
            for min_quality in [None, Some(0.7), Some(0.8)] {
                for feature in [None, Some(Feature::Streaming), Some(Feature::Vision)] {
                    let constraints = RoutingConstraints {
                        max_cost,
                        max_latency_ms: max_latency,
                        min_quality,
                        required_features: feature.into_iter().collect(),
                        ..Default::default()
                    };
                    let request = RoutingRequest::new(task).with_constraints(constraints.clone());

                    let Ok(decision) = router.select_provider(&request) else {
                        continue;
                    };
                    let profile = router.registry().profile(&decision.provider_id).unwrap();

                    if let Some(limit) = max_cost {
                        assert!(estimate_cost(&profile, units) <= limit, "{:?}", constraints);
                    }
                    if let Some(limit) = max_latency {
                        assert!(profile.latency.time_to_first_token_ms <= limit);
                    }
                    if let Some(minimum) = min_quality {
                        assert!(profile.quality.mean() >= minimum);
                    }
                    if let Some(feature) = feature {
                        assert!(profile.features.supports(feature));
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn test_provider_without_credential_is_never_selected() {
    let registry = Arc::new(
        ProviderRegistry::from_profiles(
            vec![
                provider("unkeyed", "openai", 0.001, 0.99)
                    .with_credential("FLOWPLAN_TEST_SURELY_UNSET_KEY"),
                provider("keyed", "anthropic", 0.002, 0.7).with_credential("sk-literal-key"),
            ],
            100,
        )
        .unwrap(),
    );
    let router = Router::new(registry.clone());
    let request = RoutingRequest::new("draft a reply");
    assert_eq!(router.select_provider(&request).unwrap().provider_id, "unkeyed");

    let report = HealthMonitor::new(
        registry.clone(),
        Arc::new(EnvCredentialSource::new()),
        Duration::from_secs(45),
        Duration::from_secs(1),
    )
    .run_once()
    .await;

    assert_eq!(report.available, vec!["keyed".to_string()]);
    assert!(!registry.is_available("unkeyed"));
    assert_eq!(router.select_provider(&request).unwrap().provider_id, "keyed");
}

#[tokio::test]
async fn test_fallback_runs_on_other_backend() {
    let router = router_with(vec![
        provider("primary", "openai", 0.001, 0.95),
        provider("secondary", "anthropic", 0.002, 0.9),
        provider("sibling", "openai", 0.002, 0.9),
    ]);
    let calls = AtomicUsize::new(0);
    let request = RoutingRequest::new("draft a reply");

    let output = router
        .execute_with_fallback(&request, Duration::from_secs(1), &CancellationToken::new(), |profile| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if profile.id == "primary" {
                    anyhow::bail!("HTTP 503");
                }
                Ok::<_, anyhow::Error>(profile.id.clone())
            }
        })
        .await
        .unwrap();

    assert_eq!(output.value, "secondary");
    assert_eq!(output.provider_id, "secondary");
    assert!(output.used_fallback);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(router.registry().sample_count("secondary"), 1);
}

#[tokio::test]
async fn test_second_failure_returns_original_error() {
    let router = router_with(vec![
        provider("primary", "openai", 0.001, 0.95),
        provider("secondary", "anthropic", 0.002, 0.9),
    ]);
    let calls = AtomicUsize::new(0);

    let err = router
        .execute_with_fallback(
            &RoutingRequest::new("draft a reply"),
            Duration::from_secs(1),
            &CancellationToken::new(),
            |profile| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(anyhow::anyhow!("{} is down", profile.id)) }
            },
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    match err {
        RouterError::ProviderCall { provider_id, message } => {
            assert_eq!(provider_id, "primary");
            assert!(message.contains("primary is down"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_no_fallback_on_single_backend() {
    let router = router_with(vec![
        provider("a", "openai", 0.001, 0.95),
        provider("b", "openai", 0.002, 0.9),
    ]);
    let calls = AtomicUsize::new(0);

    let result = router
        .execute_with_fallback(
            &RoutingRequest::new("task"),
            Duration::from_secs(1),
            &CancellationToken::new(),
            |_profile| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::anyhow!("rate limited")) }
            },
        )
        .await;

    assert!(matches!(result, Err(RouterError::ProviderCall { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_call_times_out_and_falls_back() {
    let router = router_with(vec![
        provider("slow", "openai", 0.001, 0.95),
        provider("quick", "anthropic", 0.002, 0.9),
    ]);

    let output = router
        .execute_with_fallback(
            &RoutingRequest::new("task"),
            Duration::from_millis(50),
            &CancellationToken::new(),
            |profile| async move {
                if profile.id == "slow" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, anyhow::Error>(profile.id.clone())
            },
        )
        .await
        .unwrap();

    assert_eq!(output.provider_id, "quick");
    assert!(output.used_fallback);
}

#[tokio::test]
async fn test_cancellation_aborts_without_fallback() {
    let router = router_with(vec![
        provider("primary", "openai", 0.001, 0.95),
        provider("secondary", "anthropic", 0.002, 0.9),
    ]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let calls = AtomicUsize::new(0);

    let result = router
        .execute_with_fallback(&RoutingRequest::new("task"), Duration::from_secs(5), &cancel, |_profile| {
            calls.fetch_add(1, Ordering::SeqCst);
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), anyhow::Error>(())
            }
        })
        .await;

    assert!(matches!(result, Err(RouterError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

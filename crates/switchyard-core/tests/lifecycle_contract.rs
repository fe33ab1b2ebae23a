//! Architectural Contract Test: Instance Lifecycle
//!
//! This test verifies that every lifecycle verb on one instance is
//! serialized, bounded by a deadline and leaves the instance in a defined
//! state.
//!
//! Constraints verified:
//! - A start that outlives its deadline fails with `StartupTimeout`
//! - Concurrent verbs on one instance never interleave
//! - Unregistering waits for an in-flight start
//! - Rejected configuration never reaches the registry
//!
//! If this test fails, someone has:
//! - Dropped the per-instance lifecycle lock
//! - Called a provider without a timeout
//! - Stored settings before validating them

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use switchyard_core::registry::{EventType, LifecycleOptions};
use switchyard_core::{ErrorKind, HealthStatus, ProviderStatus};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn start_beyond_deadline_times_out_and_fails_instance() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    harness.knobs("db").set_start_delay(Duration::from_millis(500));
    let events = harness.record_events();

    let err = harness
        .registry
        .start_provider(
            "db",
            LifecycleOptions::default().with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StartupTimeout);
    let info = harness.registry.provider_info("db").await.unwrap();
    assert_eq!(info.status, ProviderStatus::Failed);
    assert_eq!(info.health, HealthStatus::Unhealthy);
    assert_eq!(info.error_count, 1);

    let types: Vec<EventType> = events
        .lock()
        .unwrap()
        .iter()
        .map(|event| event.event_type)
        .collect();
    assert_eq!(
        types,
        vec![EventType::ProviderStarting, EventType::ProviderFailed]
    );
}

#[tokio::test]
async fn start_retries_before_giving_up() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    harness.knobs("db").fail_start.store(true, Ordering::SeqCst);

    let err = harness
        .registry
        .start_provider("db", LifecycleOptions::default().with_retries(2))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProviderFailure);
    assert_eq!(harness.calls_to("start").len(), 3);
}

#[tokio::test]
async fn restart_reports_starting_until_complete() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    assert_ok!(
        harness
            .registry
            .start_provider("db", LifecycleOptions::default())
            .await
    );
    harness.knobs("db").set_start_delay(Duration::from_millis(200));
    let events = harness.record_events();

    let registry = Arc::clone(&harness.registry);
    let restart = tokio::spawn(async move {
        registry
            .restart_provider("db", LifecycleOptions::default())
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        harness.registry.status("db").await.unwrap(),
        ProviderStatus::Starting
    );

    assert_ok!(restart.await.unwrap());
    assert_eq!(
        harness.registry.status("db").await.unwrap(),
        ProviderStatus::Active
    );
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .any(|event| event.event_type == EventType::ProviderRestarted)
    );
}

#[tokio::test]
async fn concurrent_starts_call_provider_once() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    harness.knobs("db").set_start_delay(Duration::from_millis(100));

    let first = Arc::clone(&harness.registry);
    let second = Arc::clone(&harness.registry);
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.start_provider("db", LifecycleOptions::default()).await }),
        tokio::spawn(async move { second.start_provider("db", LifecycleOptions::default()).await }),
    );

    assert_ok!(a.unwrap());
    assert_ok!(b.unwrap());
    assert_eq!(harness.calls_to("start"), vec!["db"]);
}

#[tokio::test]
async fn unregister_waits_for_in_flight_start() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    harness.knobs("db").set_start_delay(Duration::from_millis(200));

    let registry = Arc::clone(&harness.registry);
    let start = tokio::spawn(async move {
        registry
            .start_provider("db", LifecycleOptions::default())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_ok!(harness.registry.unregister_provider("db").await);
    assert_ok!(start.await.unwrap());

    let lifecycle: Vec<String> = harness
        .calls()
        .into_iter()
        .filter(|call| !call.starts_with("configure:"))
        .collect();
    assert_eq!(lifecycle, vec!["start:db", "started:db", "stop:db"]);
    assert!(!harness.registry.contains("db").await);
}

#[tokio::test]
async fn unregister_reassigns_category_default() {
    let harness = Harness::new();
    harness.register("primary", "mock-sql").await;
    harness.register("replica", "mock-sql").await;
    assert_eq!(
        harness.registry.default_provider("database").await.as_deref(),
        Some("primary")
    );
    let events = harness.record_events();

    assert_ok!(harness.registry.unregister_provider("primary").await);

    assert_eq!(
        harness.registry.default_provider("database").await.as_deref(),
        Some("replica")
    );
    let types: Vec<EventType> = events
        .lock()
        .unwrap()
        .iter()
        .map(|event| event.event_type)
        .collect();
    assert!(types.contains(&EventType::ProviderUnregistered));
    assert!(types.contains(&EventType::DefaultProviderChanged));
}

#[tokio::test]
async fn rejected_settings_leave_instance_untouched() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    let events = harness.record_events();

    let err = harness
        .registry
        .update_provider_config("db", json!({ "label": "db", "invalid": true }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    let info = harness.registry.provider_info("db").await.unwrap();
    assert_eq!(info.config.settings, json!({ "label": "db" }));
    assert!(events.lock().unwrap().is_empty());

    assert_ok!(
        harness
            .registry
            .update_provider_config("db", json!({ "label": "db", "pool": 4 }))
            .await
    );
    let info = harness.registry.provider_info("db").await.unwrap();
    assert_eq!(info.config.settings["pool"], 4);
    assert_eq!(
        events.lock().unwrap().last().map(|event| event.event_type),
        Some(EventType::ConfigUpdated)
    );
}

#[tokio::test]
async fn registration_errors_are_structural() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;

    let duplicate = harness
        .registry
        .register_provider("db", "mock-sql", mock("db"))
        .await
        .unwrap_err();
    assert_eq!(duplicate.kind(), ErrorKind::InvalidState);

    let unknown = harness
        .registry
        .register_provider("other", "mock-graph", mock("other"))
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::UnknownProviderType);

    let rejected = harness
        .registry
        .register_provider(
            "broken",
            "mock-sql",
            switchyard_core::ProviderConfig::new(json!({ "label": "broken", "invalid": true })),
        )
        .await
        .unwrap_err();
    assert_eq!(rejected.kind(), ErrorKind::ConfigInvalid);
    assert!(!harness.registry.contains("broken").await);

    assert_err!(
        harness
            .registry
            .register_provider("   ", "mock-sql", mock("blank"))
            .await
    );
}

#[tokio::test]
async fn forced_start_ignores_unready_dependency() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    harness
        .registry
        .register_provider("cache", "mock-cache", mock("cache").depends_on("db"))
        .await
        .unwrap();

    let err = harness
        .registry
        .start_provider("cache", LifecycleOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedDependency);

    assert_ok!(
        harness
            .registry
            .start_provider("cache", LifecycleOptions::default().forced())
            .await
    );
    assert_eq!(
        harness.registry.status("cache").await.unwrap(),
        ProviderStatus::Active
    );
    assert_eq!(
        harness.registry.status("db").await.unwrap(),
        ProviderStatus::Stopped
    );
}

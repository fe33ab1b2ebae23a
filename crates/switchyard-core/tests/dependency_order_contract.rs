//! Architectural Contract Test: Dependency Ordering
//!
//! This test verifies that the registry never starts an instance before the
//! instances it requires, and never stops one before its dependents.
//!
//! Constraints verified:
//! - Startup follows dependency order, shutdown the exact reverse
//! - Cycles are refused and leave the graph unchanged
//! - Missing required dependencies block registration and start
//! - A failed dependency stops (or, forced, skips) everything that needs it
//!
//! If this test fails, someone has:
//! - Started instances in map or registration order
//! - Added edges without a cycle check
//! - Let a stop cascade skip running dependents

mod common;

use common::*;
use std::sync::atomic::Ordering;
use switchyard_core::registry::LifecycleOptions;
use switchyard_core::{ErrorKind, ProviderStatus};

/// db <- cache <- search
async fn chain() -> Harness {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    harness
        .registry
        .register_provider("cache", "mock-cache", mock("cache").depends_on("db"))
        .await
        .unwrap();
    harness
        .registry
        .register_provider("search", "mock-doc", mock("search").depends_on("cache"))
        .await
        .unwrap();
    harness
}

#[tokio::test]
async fn startup_follows_dependencies_and_shutdown_reverses_it() {
    let harness = chain().await;

    let started = harness
        .registry
        .start_all_providers(LifecycleOptions::default())
        .await
        .unwrap();
    assert!(started.is_clean());
    assert_eq!(harness.calls_to("start"), vec!["db", "cache", "search"]);

    harness
        .registry
        .stop_all_providers(LifecycleOptions::default())
        .await
        .unwrap();
    assert_eq!(harness.calls_to("stop"), vec!["search", "cache", "db"]);

    let startup = harness.registry.startup_order().await.unwrap();
    let mut shutdown = harness.registry.shutdown_order().await.unwrap();
    shutdown.reverse();
    assert_eq!(startup, shutdown);
}

#[tokio::test]
async fn cycle_is_refused_and_graph_unchanged() {
    let harness = chain().await;
    let before = harness.registry.startup_order().await.unwrap();

    let err = harness
        .registry
        .add_dependency("db", "search", true)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CircularDependency);
    assert_eq!(harness.registry.startup_order().await.unwrap(), before);
    assert!(harness.registry.dependencies_of("db").await.unwrap().is_empty());
}

#[tokio::test]
async fn required_dependency_must_be_registered() {
    let harness = Harness::new();

    let err = harness
        .registry
        .register_provider("cache", "mock-cache", mock("cache").depends_on("db"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedDependency);
    assert!(!harness.registry.contains("cache").await);

    harness
        .registry
        .register_provider(
            "cache",
            "mock-cache",
            mock("cache").optionally_depends_on("db"),
        )
        .await
        .expect("optional dependencies may be absent");
}

#[tokio::test]
async fn failed_dependency_aborts_unforced_batch() {
    let harness = chain().await;
    harness.knobs("db").fail_start.store(true, Ordering::SeqCst);

    let err = harness
        .registry
        .start_all_providers(LifecycleOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProviderFailure);
    assert_eq!(harness.calls_to("start"), vec!["db"]);
    assert_eq!(
        harness.registry.status("db").await.unwrap(),
        ProviderStatus::Failed
    );
    assert_eq!(
        harness.registry.status("cache").await.unwrap(),
        ProviderStatus::Stopped
    );
}

#[tokio::test]
async fn forced_batch_skips_dependents_of_failed_instance() {
    let harness = chain().await;
    harness.knobs("db").fail_start.store(true, Ordering::SeqCst);

    let report = harness
        .registry
        .start_all_providers(LifecycleOptions::default().forced())
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "db");
    assert_eq!(report.failed[0].kind, ErrorKind::ProviderFailure);
    assert_eq!(report.skipped, vec!["cache", "search"]);
    assert!(report.succeeded.is_empty());
}

#[tokio::test]
async fn start_with_dependencies_brings_up_the_chain() {
    let harness = chain().await;

    let err = harness
        .registry
        .start_provider("search", LifecycleOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedDependency);
    assert!(harness.calls_to("start").is_empty());

    harness
        .registry
        .start_provider("search", LifecycleOptions::default().with_dependencies())
        .await
        .unwrap();
    assert_eq!(harness.calls_to("start"), vec!["db", "cache", "search"]);
}

#[tokio::test]
async fn stop_refuses_while_dependents_run() {
    let harness = chain().await;
    harness
        .registry
        .start_all_providers(LifecycleOptions::default())
        .await
        .unwrap();

    let err = harness
        .registry
        .stop_provider("db", LifecycleOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(harness.calls_to("stop").is_empty());

    harness
        .registry
        .stop_provider("db", LifecycleOptions::default().with_dependencies())
        .await
        .unwrap();
    assert_eq!(harness.calls_to("stop"), vec!["search", "cache", "db"]);
}

#[tokio::test]
async fn dependency_edges_can_be_added_and_removed() {
    let harness = Harness::new();
    harness.register("db", "mock-sql").await;
    harness.register("cache", "mock-cache").await;

    harness
        .registry
        .add_dependency("cache", "db", true)
        .await
        .unwrap();
    assert_eq!(
        harness.registry.dependents_of("db").await.unwrap(),
        vec!["cache"]
    );
    assert_eq!(
        harness.registry.startup_order().await.unwrap(),
        vec!["db", "cache"]
    );

    assert!(harness.registry.remove_dependency("cache", "db").await.unwrap());
    assert!(harness.registry.dependents_of("db").await.unwrap().is_empty());
}

//! Architectural Contract Test: Migration Planning
//!
//! This test verifies that planning is a pure read of registry state that
//! produces a deterministic step list and risk rating.
//!
//! Constraints verified:
//! - Same-family moves skip transformation and stay low risk
//! - Cross-family moves add a transform step and require a backup
//! - Data size feeds the risk score
//! - Stale plans are caught by validation before anything runs
//!
//! If this test fails, someone has:
//! - Made planning touch providers beyond reading metrics
//! - Changed the step sequence or the scoring table

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use switchyard_core::migration::{MigrationEngine, RiskLevel, StepKind, TargetSpec};
use switchyard_core::registry::LifecycleOptions;
use switchyard_core::{ErrorKind, MigrationConfig};

fn orders() -> Vec<serde_json::Value> {
    vec![
        json!({ "id": 1, "total": 12 }),
        json!({ "id": 2, "total": 40 }),
        json!({ "id": 3, "total": 7 }),
    ]
}

fn engine(harness: &Harness) -> MigrationEngine {
    MigrationEngine::new(Arc::clone(&harness.registry), MigrationConfig::default())
}

fn step_ids(plan: &switchyard_core::MigrationPlan) -> Vec<&str> {
    plan.steps.iter().map(|step| step.id.as_str()).collect()
}

#[tokio::test]
async fn same_family_plan_is_low_risk_without_transform() {
    let harness = Harness::new();
    harness
        .registry
        .register_provider("orders", "mock-sql", seeded("orders", "orders", orders()))
        .await
        .unwrap();
    harness.register("replica", "mock-sql").await;

    let plan = engine(&harness)
        .plan_migration("orders", "replica", None)
        .await
        .unwrap();

    assert_eq!(plan.risk_level, RiskLevel::Low);
    assert!(plan.target_exists);
    assert!(!plan.backup_required);
    assert!(plan.compatibility.warnings.is_empty());
    assert_eq!(
        step_ids(&plan),
        vec![
            "validate-migration",
            "create-backup",
            "prepare-target",
            "export-data",
            "import-data",
            "verify-data",
            "update-configuration",
            "test-functionality",
        ]
    );
    assert!(!plan.step(StepKind::CreateBackup).unwrap().required);
    assert!(!plan.step(StepKind::TestFunctionality).unwrap().required);
    assert_eq!(plan.data_size_bytes, 300);
    assert_eq!(
        plan.estimated_duration_secs,
        plan.steps.iter().map(|step| step.estimated_secs).sum::<u64>()
    );
}

#[tokio::test]
async fn cross_family_plan_transforms_and_requires_backup() {
    let harness = Harness::new();
    harness.register("orders", "mock-sql").await;
    let target = TargetSpec::new("mock-doc", mock("docs"));

    let plan = engine(&harness)
        .plan_migration("orders", "docs", Some(&target))
        .await
        .unwrap();

    assert_eq!(plan.risk_level, RiskLevel::High);
    assert!(!plan.target_exists);
    assert_eq!(plan.target_type, "mock-doc");
    assert!(plan.backup_required);
    assert!(plan.step(StepKind::CreateBackup).unwrap().required);
    assert_eq!(plan.steps.len(), 9);
    assert_eq!(
        plan.steps
            .iter()
            .position(|step| step.kind == StepKind::TransformData),
        Some(4)
    );
    assert!(!plan.compatibility.schema_compatible);
    assert!(!plan.compatibility.data_compatible);
    assert_eq!(
        plan.compatibility.missing_capabilities,
        vec!["joins", "transactions"]
    );
}

#[tokio::test]
async fn document_to_key_value_is_medium_risk() {
    let harness = Harness::new();
    harness.register("docs", "mock-doc").await;
    harness.register("cache", "mock-cache").await;

    let plan = engine(&harness)
        .plan_migration("docs", "cache", None)
        .await
        .unwrap();

    assert_eq!(plan.risk_level, RiskLevel::Medium);
    assert!(plan.compatibility.schema_compatible);
    assert!(!plan.compatibility.data_compatible);
    assert!(plan.has_step(StepKind::TransformData));
    assert!(
        plan.compatibility
            .warnings
            .iter()
            .any(|warning| warning.contains("Category"))
    );
}

#[tokio::test]
async fn large_source_raises_risk() {
    let harness = Harness::new();
    harness
        .registry
        .register_provider("orders", "mock-sql", seeded("orders", "orders", orders()))
        .await
        .unwrap();
    harness.register("replica", "mock-sql").await;
    let engine = MigrationEngine::new(
        Arc::clone(&harness.registry),
        MigrationConfig {
            large_data_threshold_bytes: 100,
            ..MigrationConfig::default()
        },
    );

    let plan = engine
        .plan_migration("orders", "replica", None)
        .await
        .unwrap();

    assert_eq!(plan.risk_level, RiskLevel::Medium);
    assert!(plan.backup_required);
}

#[tokio::test]
async fn planning_rejects_impossible_pairs() {
    let harness = Harness::new();
    harness.register("orders", "mock-sql").await;
    let engine = engine(&harness);

    let onto_itself = engine
        .plan_migration("orders", "orders", None)
        .await
        .unwrap_err();
    assert_eq!(onto_itself.kind(), ErrorKind::InvalidState);

    let no_target = engine
        .plan_migration("orders", "nowhere", None)
        .await
        .unwrap_err();
    assert_eq!(no_target.kind(), ErrorKind::NotFound);

    let no_source = engine
        .plan_migration("ghost", "orders", None)
        .await
        .unwrap_err();
    assert_eq!(no_source.kind(), ErrorKind::NotFound);

    let unknown_type = engine
        .plan_migration(
            "orders",
            "graph",
            Some(&TargetSpec::new("mock-graph", mock("graph"))),
        )
        .await
        .unwrap_err();
    assert_eq!(unknown_type.kind(), ErrorKind::UnknownProviderType);
}

#[tokio::test]
async fn validation_catches_stale_plans() {
    let harness = Harness::new();
    harness.register("orders", "mock-sql").await;
    harness.register("replica", "mock-sql").await;
    let engine = engine(&harness);
    let target = TargetSpec::new("mock-doc", mock("docs"));

    let existing = engine
        .plan_migration("orders", "replica", None)
        .await
        .unwrap();
    let created = engine
        .plan_migration("orders", "docs", Some(&target))
        .await
        .unwrap();

    let report = engine.validate_migration(&existing, None).await;
    assert!(report.is_valid());
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.contains("orders"))
    );

    let wrong_type = TargetSpec::new("mock-sql", mock("docs"));
    assert!(!engine.validate_migration(&created, Some(&wrong_type)).await.is_valid());
    assert!(!engine.validate_migration(&created, None).await.is_valid());
    assert!(engine.validate_migration(&created, Some(&target)).await.is_valid());

    harness.registry.unregister_provider("replica").await.unwrap();
    let report = engine.validate_migration(&existing, None).await;
    assert!(!report.is_valid());
    assert!(
        report
            .errors
            .iter()
            .any(|error| error.contains("no longer registered"))
    );

    harness.registry.unregister_provider("orders").await.unwrap();
    assert!(!engine.validate_migration(&created, Some(&target)).await.is_valid());
}

#[tokio::test]
async fn planning_does_not_touch_providers() {
    let harness = Harness::new();
    harness.register("orders", "mock-sql").await;
    harness.register("replica", "mock-sql").await;
    harness
        .registry
        .start_all_providers(LifecycleOptions::default())
        .await
        .unwrap();
    harness.clear_calls();

    let engine = engine(&harness);
    let plan = engine
        .plan_migration("orders", "replica", None)
        .await
        .unwrap();
    engine.validate_migration(&plan, None).await;

    assert!(harness.calls().is_empty());
    assert!(engine.active_migrations().is_empty());
    assert!(engine.migration_history().is_empty());
}

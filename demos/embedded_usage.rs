//! Minimal embedding example for switchyard-core
//!
//! Uses the registry and migration engine as a library, without the daemon:
//! registers two in-memory stores, starts them in dependency order, watches
//! events, then moves the relational store's data into a new document store.

use serde_json::json;
use std::sync::Arc;
use switchyard_core::migration::{ExecuteOptions, MigrationEngine, TargetSpec};
use switchyard_core::registry::{FactoryTable, LifecycleOptions, ProviderRegistry};
use switchyard_core::{MigrationConfig, ProviderConfig, RegistryConfig, Result};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let mut factories = FactoryTable::new();
    switchyard_provider_memory::register(&mut factories);
    let registry = Arc::new(ProviderRegistry::new(factories, RegistryConfig::default()));

    let subscription = registry.subscribe_to_events(|event| {
        info!("event: {} on {}", event.event_type, event.provider_id);
    });

    registry
        .register_provider(
            "primary-db",
            "memory-sql",
            ProviderConfig::new(json!({
                "seed": {
                    "guests": [
                        { "id": 1, "name": "Ada", "address.city": "London" },
                        { "id": 2, "name": "Grace", "address.city": "Arlington" }
                    ]
                }
            })),
        )
        .await?;
    registry
        .register_provider(
            "sessions",
            "memory-document",
            ProviderConfig::default()
                .with_category("cache")
                .depends_on("primary-db"),
        )
        .await?;

    let report = registry
        .start_all_providers(LifecycleOptions::default())
        .await?;
    info!("started: {:?}", report.succeeded);

    let health = registry.check_all_health().await;
    info!("health: {:?}", health);

    let engine = MigrationEngine::new(Arc::clone(&registry), MigrationConfig::default());
    let target = TargetSpec::new("memory-document", ProviderConfig::default());
    let plan = engine
        .plan_migration("primary-db", "documents", Some(&target))
        .await?;
    info!(
        "plan {}: risk {:?}, steps {:?}",
        plan.id,
        plan.risk_level,
        plan.steps.iter().map(|step| step.id.as_str()).collect::<Vec<_>>()
    );

    let progress = engine
        .execute_migration(
            &plan,
            Some(target),
            ExecuteOptions::default().on_progress(|progress| {
                info!(
                    "migration {:.0}% ({:?})",
                    progress.percent_complete() * 100.0,
                    progress.current_step
                );
            }),
        )
        .await?;
    info!(
        "migration {:?}: {} record(s) moved",
        progress.status, progress.records_transferred
    );
    info!("database default is now {:?}", registry.default_provider("database").await);

    registry
        .stop_all_providers(LifecycleOptions::default().forced())
        .await?;
    subscription.unsubscribe();
    Ok(())
}

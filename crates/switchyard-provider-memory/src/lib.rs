// # In-Memory Reference Providers
//
// Two providers for the switchyard registry that keep all data in process
// memory:
//
// - `memory-sql`: relational family, flat rows grouped by table
// - `memory-document`: document family, nested JSON documents grouped by
//   collection
//
// Both implement the full optional surface (setup automation, multi-service,
// wizard) so the registry and migration engine can be exercised end to end
// without an external database.
//
// ## Trust Level: Managed
//
// **Allowed Capabilities**:
// - ✅ Own their in-memory tables and backup snapshots
// - ✅ Report health, metrics and diagnostics on demand
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads (supervision is owned by the registry)
// - ❌ Enforce lifecycle timeouts (owned by the registry)
// - ❌ Reach into other providers
//
// ## Settings
//
// ```json
// {
//   "max_records": 10000,
//   "seed": { "guests": [ { "id": 1, "name": "Ada" } ] }
// }
// ```
//
// `seed` is loaded on the first start of an empty store. `memory-sql` rejects
// seed rows that are not flat objects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use switchyard_core::config::ProviderConfig;
use switchyard_core::registry::FactoryTable;
use switchyard_core::traits::{
    DataExport, DetailedHealth, DiagnosticResult, ImportReport, MultiService, PerformanceCounters,
    Provider, ProviderFactory, ProviderFamily, ProviderMetrics, ProviderRequirements,
    ResourceUsage, ServiceDescriptor, SetupAutomation, WizardField, WizardIntegration, WizardStep,
};
use switchyard_core::{Error, Result};
use tracing::{debug, info};
use uuid::Uuid;

type Tables = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Clone)]
struct Snapshot {
    taken_at: DateTime<Utc>,
    tables: Tables,
}

/// Which store a provider emulates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sql,
    Document,
}

impl StoreKind {
    pub fn provider_type(self) -> &'static str {
        match self {
            StoreKind::Sql => "memory-sql",
            StoreKind::Document => "memory-document",
        }
    }

    pub fn family(self) -> ProviderFamily {
        match self {
            StoreKind::Sql => ProviderFamily::Relational,
            StoreKind::Document => ProviderFamily::Document,
        }
    }

    fn description(self) -> &'static str {
        match self {
            StoreKind::Sql => "In-memory relational store (flat rows per table)",
            StoreKind::Document => "In-memory document store (nested documents per collection)",
        }
    }

    fn capabilities(self) -> Vec<String> {
        let names: &[&str] = match self {
            StoreKind::Sql => &["transactions", "joins", "indexes", "full_text_search"],
            StoreKind::Document => &["indexes", "nested_documents", "full_text_search"],
        };
        names.iter().map(|name| name.to_string()).collect()
    }

    /// Sub-services and whether they start enabled
    fn services(self) -> BTreeMap<String, bool> {
        let services: &[(&str, bool)] = match self {
            StoreKind::Sql => &[("query_log", false), ("replication", true)],
            StoreKind::Document => &[("change_stream", false), ("text_index", true)],
        };
        services
            .iter()
            .map(|(name, enabled)| (name.to_string(), *enabled))
            .collect()
    }
}

/// Provider settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemorySettings {
    /// Upper bound on records across all tables
    #[serde(default)]
    pub max_records: Option<u64>,

    /// Data loaded on the first start of an empty store
    #[serde(default)]
    pub seed: Tables,
}

impl MemorySettings {
    /// Parse and validate settings for a store kind
    ///
    /// `null` yields the defaults.
    pub fn parse(kind: StoreKind, settings: &Value) -> Result<Self> {
        let parsed: MemorySettings = if settings.is_null() {
            MemorySettings::default()
        } else {
            serde_json::from_value(settings.clone())
                .map_err(|e| Error::config_invalid(format!("{}: {}", kind.provider_type(), e)))?
        };
        parsed.validate(kind)?;
        Ok(parsed)
    }

    fn validate(&self, kind: StoreKind) -> Result<()> {
        if self.max_records == Some(0) {
            return Err(Error::config_invalid("max_records must be greater than 0"));
        }

        let seeded: u64 = self.seed.values().map(|rows| rows.len() as u64).sum();
        if let Some(max) = self.max_records
            && seeded > max
        {
            return Err(Error::config_invalid(format!(
                "seed holds {} records, more than max_records {}",
                seeded, max
            )));
        }

        for (table, records) in &self.seed {
            for (index, record) in records.iter().enumerate() {
                check_record(kind, record).map_err(|reason| {
                    Error::config_invalid(format!("seed {}[{}]: {}", table, index, reason))
                })?;
            }
        }
        Ok(())
    }
}

/// Shape check applied to seeded and imported records
fn check_record(kind: StoreKind, record: &Value) -> std::result::Result<(), String> {
    let Value::Object(fields) = record else {
        return Err("record is not an object".to_string());
    };
    if kind == StoreKind::Sql
        && let Some((column, _)) = fields.iter().find(|(_, value)| value.is_object())
    {
        return Err(format!("column '{}' holds a nested object", column));
    }
    Ok(())
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn count(tables: &Tables) -> u64 {
    tables.values().map(|rows| rows.len() as u64).sum()
}

/// In-memory store provider
///
/// # Trust Level: Managed
///
/// Keeps every record in memory. Data survives `stop()`/`start()` on the same
/// instance but not a new instance.
pub struct MemoryProvider {
    kind: StoreKind,
    settings: Mutex<MemorySettings>,
    running: AtomicBool,
    tables: Mutex<Tables>,
    backups: Mutex<BTreeMap<String, Snapshot>>,
    services: Mutex<BTreeMap<String, bool>>,
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("kind", &self.kind)
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("records", &count(&guard(&self.tables)))
            .finish_non_exhaustive()
    }
}

impl MemoryProvider {
    /// Stopped, empty store of the given kind
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            settings: Mutex::new(MemorySettings::default()),
            running: AtomicBool::new(false),
            tables: Mutex::new(Tables::new()),
            backups: Mutex::new(BTreeMap::new()),
            services: Mutex::new(kind.services()),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    /// Store kind this instance emulates
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Whether `start` has run without a later `stop`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Total records across tables
    pub fn record_count(&self) -> u64 {
        count(&guard(&self.tables))
    }

    /// Records of one table, empty when the table does not exist
    pub fn records(&self, table: &str) -> Vec<Value> {
        guard(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// Append one record, subject to shape and capacity checks
    pub fn insert(&self, table: &str, record: Value) -> Result<()> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let result = self.try_insert(table, record);
        if result.is_err() {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn try_insert(&self, table: &str, record: Value) -> Result<()> {
        self.ensure_running()?;
        check_record(self.kind, &record)
            .map_err(|reason| Error::provider(self.kind.provider_type(), reason))?;

        let max = guard(&self.settings).max_records;
        let mut tables = guard(&self.tables);
        if let Some(max) = max
            && count(&tables) >= max
        {
            return Err(Error::provider(
                self.kind.provider_type(),
                format!("capacity of {} records reached", max),
            ));
        }
        tables.entry(table.to_string()).or_default().push(record);
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::provider(self.kind.provider_type(), "store is not running"))
        }
    }

    fn at_capacity(&self) -> bool {
        let max = guard(&self.settings).max_records;
        max.is_some_and(|max| self.record_count() >= max)
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn configure(&self, settings: &Value) -> Result<()> {
        let parsed = MemorySettings::parse(self.kind, settings)?;
        *guard(&self.settings) = parsed;
        debug!("{} configured", self.kind.provider_type());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        {
            let seed = guard(&self.settings).seed.clone();
            let mut tables = guard(&self.tables);
            if tables.is_empty() && !seed.is_empty() {
                debug!("{} loading {} seeded records", self.kind.provider_type(), count(&seed));
                *tables = seed;
            }
        }
        self.running.store(true, Ordering::SeqCst);
        info!("{} started", self.kind.provider_type());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        info!("{} stopped", self.kind.provider_type());
        Ok(())
    }

    async fn detailed_health(&self) -> Result<DetailedHealth> {
        let performance = PerformanceCounters {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.requests_failed.load(Ordering::Relaxed),
            avg_response_ms: 0.0,
        };

        let mut health = if !self.is_running() {
            DetailedHealth::unhealthy("store is not running")
        } else if self.at_capacity() {
            DetailedHealth::degraded("record capacity reached")
        } else {
            DetailedHealth::healthy()
        };
        health.checks.insert("running".to_string(), self.is_running());
        health.checks.insert("capacity".to_string(), !self.at_capacity());
        health.performance = performance;
        Ok(health)
    }

    async fn metrics(&self) -> Result<ProviderMetrics> {
        let (records, bytes) = {
            let tables = guard(&self.tables);
            let bytes: u64 = tables
                .values()
                .flatten()
                .map(|record| record.to_string().len() as u64)
                .sum();
            (count(&tables), bytes)
        };

        let mut metrics = ProviderMetrics {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            data_size_bytes: Some(bytes),
            record_count: Some(records),
            resources: ResourceUsage {
                memory_bytes: bytes,
                ..ResourceUsage::default()
            },
            ..ProviderMetrics::default()
        };
        metrics
            .custom
            .insert("tables".to_string(), guard(&self.tables).len() as f64);
        Ok(metrics)
    }

    async fn validate_config(&self, settings: &Value) -> Result<()> {
        let parsed = MemorySettings::parse(self.kind, settings)?;
        if let Some(max) = parsed.max_records {
            let records = self.record_count();
            if records > max {
                return Err(Error::config_invalid(format!(
                    "max_records {} is below the {} records already stored",
                    max, records
                )));
            }
        }
        Ok(())
    }

    async fn run_diagnostics(&self) -> Result<Vec<DiagnosticResult>> {
        let mut results = Vec::new();

        results.push(if self.is_running() {
            DiagnosticResult::pass("running")
        } else {
            DiagnosticResult::fail("running", "store is not running")
        });

        results.push(if self.at_capacity() {
            DiagnosticResult::fail("capacity", "record capacity reached")
        } else {
            DiagnosticResult::pass("capacity")
        });

        let malformed = guard(&self.tables)
            .iter()
            .flat_map(|(table, rows)| rows.iter().map(move |row| (table, row)))
            .filter(|(_, row)| check_record(self.kind, row).is_err())
            .count();
        results.push(if malformed == 0 {
            DiagnosticResult::pass("record_shape")
        } else {
            DiagnosticResult::fail("record_shape", format!("{} malformed record(s)", malformed))
        });

        Ok(results)
    }

    fn debug_info(&self) -> Value {
        let tables: BTreeMap<String, usize> = guard(&self.tables)
            .iter()
            .map(|(name, rows)| (name.clone(), rows.len()))
            .collect();
        let backups: BTreeMap<String, String> = guard(&self.backups)
            .iter()
            .map(|(id, snapshot)| (id.clone(), snapshot.taken_at.to_rfc3339()))
            .collect();
        json!({
            "type": self.kind.provider_type(),
            "running": self.is_running(),
            "tables": tables,
            "backups": backups,
            "max_records": guard(&self.settings).max_records,
        })
    }

    fn capabilities(&self) -> Vec<String> {
        self.kind.capabilities()
    }

    fn setup_automation(&self) -> Option<&dyn SetupAutomation> {
        Some(self)
    }

    fn multi_service(&self) -> Option<&dyn MultiService> {
        Some(self)
    }

    fn wizard(&self) -> Option<&dyn WizardIntegration> {
        Some(self)
    }
}

#[async_trait]
impl SetupAutomation for MemoryProvider {
    fn can_auto_setup(&self) -> bool {
        true
    }

    async fn export_data(&self) -> Result<DataExport> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let mut export = DataExport::new(self.kind.family());
        export.collections = guard(&self.tables).clone();
        debug!(
            "{} exported {} records",
            self.kind.provider_type(),
            export.record_count()
        );
        Ok(export)
    }

    async fn import_data(&self, data: &DataExport) -> Result<ImportReport> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let provider_type = self.kind.provider_type();

        if let Err(e) = self.ensure_running() {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
        if data.family != self.kind.family() {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
            return Err(Error::provider(
                provider_type,
                format!("cannot import {} data into a {} store", data.family, self.kind.family()),
            ));
        }

        let max = guard(&self.settings).max_records;
        let mut tables = guard(&self.tables);
        let incoming = data.record_count();
        if let Some(max) = max
            && count(&tables) + incoming > max
        {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
            return Err(Error::provider(
                provider_type,
                format!(
                    "importing {} records would exceed capacity of {}",
                    incoming, max
                ),
            ));
        }

        let mut report = ImportReport::default();
        for (table, records) in &data.collections {
            let rows = tables.entry(table.clone()).or_default();
            for (index, record) in records.iter().enumerate() {
                if let Err(reason) = check_record(self.kind, record) {
                    report
                        .warnings
                        .push(format!("skipped {}[{}]: {}", table, index, reason));
                    continue;
                }
                report.bytes_imported += record.to_string().len() as u64;
                report.records_imported += 1;
                rows.push(record.clone());
            }
        }

        info!(
            "{} imported {} records ({} skipped)",
            provider_type,
            report.records_imported,
            report.warnings.len()
        );
        Ok(report)
    }

    async fn create_backup(&self) -> Result<String> {
        let snapshot = Snapshot {
            taken_at: Utc::now(),
            tables: guard(&self.tables).clone(),
        };
        let backup_id = Uuid::new_v4().to_string();
        guard(&self.backups).insert(backup_id.clone(), snapshot);
        info!("{} backup {} created", self.kind.provider_type(), backup_id);
        Ok(backup_id)
    }

    async fn restore_backup(&self, backup_id: &str) -> Result<()> {
        let snapshot = guard(&self.backups)
            .get(backup_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("backup {}", backup_id)))?;
        *guard(&self.tables) = snapshot.tables;
        info!("{} restored from backup {}", self.kind.provider_type(), backup_id);
        Ok(())
    }
}

#[async_trait]
impl MultiService for MemoryProvider {
    fn available_services(&self) -> Vec<ServiceDescriptor> {
        guard(&self.services)
            .iter()
            .map(|(name, enabled)| ServiceDescriptor {
                name: name.clone(),
                description: format!("{} {}", self.kind.provider_type(), name.replace('_', " ")),
                enabled: *enabled,
            })
            .collect()
    }

    async fn enable_service(&self, service: &str) -> Result<()> {
        self.set_service(service, true)
    }

    async fn disable_service(&self, service: &str) -> Result<()> {
        self.set_service(service, false)
    }
}

impl MemoryProvider {
    fn set_service(&self, service: &str, enabled: bool) -> Result<()> {
        let mut services = guard(&self.services);
        let slot = services
            .get_mut(service)
            .ok_or_else(|| Error::not_found(format!("service {}", service)))?;
        *slot = enabled;
        Ok(())
    }
}

const LIMITS_STEP: &str = "limits";

fn limits_step() -> WizardStep {
    WizardStep {
        id: LIMITS_STEP.to_string(),
        title: "Capacity".to_string(),
        description: "Upper bound on stored records".to_string(),
        fields: vec![WizardField {
            name: "max_records".to_string(),
            label: "Maximum records".to_string(),
            required: true,
            secret: false,
        }],
    }
}

#[async_trait]
impl WizardIntegration for MemoryProvider {
    fn wizard_steps(&self) -> Vec<WizardStep> {
        vec![limits_step()]
    }

    fn validate_step(&self, step_id: &str, data: &Value) -> Result<()> {
        if step_id != LIMITS_STEP {
            return Err(Error::not_found(format!("wizard step {}", step_id)));
        }
        let missing = limits_step().missing_fields(data);
        if !missing.is_empty() {
            return Err(Error::config_invalid(format!(
                "missing fields: {}",
                missing.join(", ")
            )));
        }
        match data.get("max_records").and_then(Value::as_u64) {
            Some(max) if max > 0 => Ok(()),
            _ => Err(Error::config_invalid("max_records must be a positive integer")),
        }
    }

    async fn execute_step(&self, step_id: &str, data: &Value) -> Result<Value> {
        self.validate_step(step_id, data)?;
        let max = data.get("max_records").and_then(Value::as_u64);
        guard(&self.settings).max_records = max;
        Ok(json!({ "max_records": max }))
    }
}

/// Factory for one store kind
#[derive(Debug, Clone, Copy)]
pub struct MemoryFactory {
    kind: StoreKind,
}

impl MemoryFactory {
    pub fn new(kind: StoreKind) -> Self {
        Self { kind }
    }

    pub fn sql() -> Self {
        Self::new(StoreKind::Sql)
    }

    pub fn document() -> Self {
        Self::new(StoreKind::Document)
    }
}

impl ProviderFactory for MemoryFactory {
    fn provider_type(&self) -> &str {
        self.kind.provider_type()
    }

    fn category(&self) -> &str {
        "database"
    }

    fn family(&self) -> ProviderFamily {
        self.kind.family()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn capabilities(&self) -> Vec<String> {
        self.kind.capabilities()
    }

    fn validate_config(&self, config: &ProviderConfig) -> Result<()> {
        MemorySettings::parse(self.kind, &config.settings).map(|_| ())
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        self.validate_config(config)?;
        Ok(Arc::new(MemoryProvider::new(self.kind)))
    }

    fn requirements(&self) -> ProviderRequirements {
        ProviderRequirements {
            min_memory_mb: 16,
            ..ProviderRequirements::default()
        }
    }

    fn wizard_steps(&self) -> Vec<WizardStep> {
        vec![limits_step()]
    }
}

/// Register both in-memory provider types
///
/// # Example
///
/// ```rust
/// use switchyard_core::registry::FactoryTable;
///
/// let mut factories = FactoryTable::new();
/// switchyard_provider_memory::register(&mut factories);
/// assert!(factories.contains("memory-sql"));
/// ```
pub fn register(table: &mut FactoryTable) {
    table
        .register(Arc::new(MemoryFactory::sql()))
        .register(Arc::new(MemoryFactory::document()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::{ErrorKind, HealthStatus};

    async fn started(kind: StoreKind, settings: Value) -> MemoryProvider {
        let provider = MemoryProvider::new(kind);
        provider.configure(&settings).await.unwrap();
        provider.start().await.unwrap();
        provider
    }

    #[test]
    fn test_settings_defaults_from_null() {
        let settings = MemorySettings::parse(StoreKind::Sql, &Value::Null).unwrap();
        assert_eq!(settings, MemorySettings::default());
    }

    #[test]
    fn test_settings_reject_unknown_fields_and_zero_capacity() {
        let unknown = MemorySettings::parse(StoreKind::Sql, &json!({"pool": 4}));
        assert_eq!(unknown.unwrap_err().kind(), ErrorKind::ConfigInvalid);

        let zero = MemorySettings::parse(StoreKind::Document, &json!({"max_records": 0}));
        assert_eq!(zero.unwrap_err().kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_sql_seed_must_be_flat() {
        let nested = json!({"seed": {"guests": [{"id": 1, "address": {"city": "Oslo"}}]}});
        assert!(MemorySettings::parse(StoreKind::Sql, &nested).is_err());
        assert!(MemorySettings::parse(StoreKind::Document, &nested).is_ok());
    }

    #[tokio::test]
    async fn test_rejected_configure_keeps_previous_settings() {
        let provider = MemoryProvider::new(StoreKind::Sql);
        provider.configure(&json!({"max_records": 5})).await.unwrap();

        assert!(provider.configure(&json!({"max_records": "many"})).await.is_err());
        assert_eq!(guard(&provider.settings).max_records, Some(5));
    }

    #[tokio::test]
    async fn test_start_loads_seed_once() {
        let provider = started(
            StoreKind::Document,
            json!({"seed": {"guests": [{"_id": 1}, {"_id": 2}]}}),
        )
        .await;
        assert_eq!(provider.record_count(), 2);

        provider.insert("guests", json!({"_id": 3})).unwrap();
        provider.stop().await.unwrap();
        provider.start().await.unwrap();
        assert_eq!(provider.record_count(), 3);
    }

    #[tokio::test]
    async fn test_health_follows_running_state_and_capacity() {
        let provider = MemoryProvider::new(StoreKind::Sql);
        provider.configure(&json!({"max_records": 1})).await.unwrap();
        assert_eq!(
            provider.detailed_health().await.unwrap().health,
            HealthStatus::Unhealthy
        );

        provider.start().await.unwrap();
        assert_eq!(provider.detailed_health().await.unwrap().health, HealthStatus::Healthy);

        provider.insert("guests", json!({"id": 1})).unwrap();
        assert_eq!(provider.detailed_health().await.unwrap().health, HealthStatus::Degraded);
        assert!(provider.insert("guests", json!({"id": 2})).is_err());

        let metrics = provider.metrics().await.unwrap();
        assert_eq!(metrics.record_count, Some(1));
        assert_eq!(metrics.requests_failed, 1);
    }

    #[tokio::test]
    async fn test_import_rejects_other_family() {
        let provider = started(StoreKind::Sql, Value::Null).await;
        let mut export = DataExport::new(ProviderFamily::Document);
        export
            .collections
            .insert("guests".into(), vec![json!({"_id": 1})]);

        let err = provider.import_data(&export).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);
        assert_eq!(provider.record_count(), 0);
    }

    #[tokio::test]
    async fn test_import_skips_malformed_rows_with_warning() {
        let provider = started(StoreKind::Sql, Value::Null).await;
        let mut export = DataExport::new(ProviderFamily::Relational);
        export.collections.insert(
            "guests".into(),
            vec![json!({"id": 1}), json!({"id": 2, "meta": {"vip": true}}), json!(7)],
        );

        let report = provider.import_data(&export).await.unwrap();
        assert_eq!(report.records_imported, 1);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(provider.records("guests"), vec![json!({"id": 1})]);
    }

    #[tokio::test]
    async fn test_backup_restore_round_trip() {
        let provider = started(StoreKind::Sql, json!({"seed": {"guests": [{"id": 1}]}})).await;
        let backup = provider.create_backup().await.unwrap();
        assert!(provider.debug_info()["backups"].get(&backup).is_some());

        provider.insert("guests", json!({"id": 2})).unwrap();
        provider.restore_backup(&backup).await.unwrap();
        assert_eq!(provider.records("guests"), vec![json!({"id": 1})]);

        let missing = provider.restore_backup("nope").await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_wizard_limits_step() {
        let provider = MemoryProvider::new(StoreKind::Document);

        assert!(provider.validate_step(LIMITS_STEP, &json!({})).is_err());
        assert!(provider.validate_step(LIMITS_STEP, &json!({"max_records": -1})).is_err());
        assert_eq!(
            provider.validate_step("network", &json!({})).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let result = provider
            .execute_step(LIMITS_STEP, &json!({"max_records": 50}))
            .await
            .unwrap();
        assert_eq!(result, json!({"max_records": 50}));
        assert_eq!(guard(&provider.settings).max_records, Some(50));
    }

    #[tokio::test]
    async fn test_services_toggle() {
        let provider = MemoryProvider::new(StoreKind::Sql);
        provider.enable_service("query_log").await.unwrap();

        let services = provider.available_services();
        assert!(services.iter().any(|s| s.name == "query_log" && s.enabled));
        assert!(provider.disable_service("sharding").await.is_err());
    }

    #[tokio::test]
    async fn test_diagnostics_report_stopped_store() {
        let provider = MemoryProvider::new(StoreKind::Sql);
        let results = provider.run_diagnostics().await.unwrap();
        assert!(results.iter().any(|r| r.name == "running" && !r.passed));
    }

    #[test]
    fn test_register_adds_both_types() {
        let mut table = FactoryTable::new();
        register(&mut table);

        assert_eq!(table.provider_types(), vec!["memory-document", "memory-sql"]);
        let sql = table.describe("memory-sql").unwrap();
        assert_eq!(sql.family, ProviderFamily::Relational);
        assert!(sql.capabilities.contains(&"transactions".to_string()));
    }

    #[test]
    fn test_factory_rejects_bad_settings() {
        let factory = MemoryFactory::sql();
        let config = ProviderConfig::new(json!({"max_records": "lots"}));
        assert!(factory.create(&config).is_err());
    }
}

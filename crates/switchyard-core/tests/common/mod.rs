//! Test doubles and common utilities for architecture contract tests
//!
//! Mock providers record every lifecycle call in a shared log and read their
//! behaviour from [`Knobs`] that tests can flip at any time. Instances are
//! addressed by the `label` in their settings, because factories never see
//! the registration name.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_core::config::{ProviderConfig, RegistryConfig};
use switchyard_core::error::{Error, Result};
use switchyard_core::registry::{FactoryTable, ProviderEvent, ProviderRegistry};
use switchyard_core::traits::{
    DataExport, DetailedHealth, DiagnosticResult, HealthStatus, ImportReport, Provider,
    ProviderFactory, ProviderFamily, ProviderMetrics, SetupAutomation,
};

/// Ordered `verb:label` entries
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Runtime-adjustable behaviour of one mock instance
#[derive(Debug)]
pub struct Knobs {
    pub start_delay_ms: AtomicU64,
    pub stop_delay_ms: AtomicU64,
    pub health_delay_ms: AtomicU64,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_import: AtomicBool,
    pub fail_diagnostics: AtomicBool,
    /// Records silently dropped on import
    pub drop_on_import: AtomicU64,
    pub health: Mutex<HealthStatus>,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            start_delay_ms: AtomicU64::new(0),
            stop_delay_ms: AtomicU64::new(0),
            health_delay_ms: AtomicU64::new(0),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_import: AtomicBool::new(false),
            fail_diagnostics: AtomicBool::new(false),
            drop_on_import: AtomicU64::new(0),
            health: Mutex::new(HealthStatus::Healthy),
        }
    }
}

impl Knobs {
    pub fn set_health(&self, health: HealthStatus) {
        *self.health.lock().unwrap() = health;
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.start_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

type Instances = Arc<Mutex<BTreeMap<String, Arc<Knobs>>>>;

/// Controllable provider
pub struct MockProvider {
    label: String,
    family: ProviderFamily,
    setup: bool,
    knobs: Arc<Knobs>,
    log: CallLog,
    data: Mutex<BTreeMap<String, Vec<Value>>>,
    backups: Mutex<BTreeMap<String, BTreeMap<String, Vec<Value>>>>,
}

impl MockProvider {
    fn record(&self, verb: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", verb, self.label));
    }

    async fn pause(millis: &AtomicU64) {
        let delay = millis.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    async fn configure(&self, settings: &Value) -> Result<()> {
        if settings.get("invalid").and_then(Value::as_bool) == Some(true) {
            return Err(Error::config_invalid("mock rejects invalid=true"));
        }
        if let Some(Value::Object(seed)) = settings.get("seed") {
            let mut data = self.data.lock().unwrap();
            for (collection, records) in seed {
                if let Value::Array(records) = records {
                    data.insert(collection.clone(), records.clone());
                }
            }
        }
        self.record("configure");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.record("start");
        Self::pause(&self.knobs.start_delay_ms).await;
        if self.knobs.fail_start.load(Ordering::SeqCst) {
            return Err(Error::provider(&self.label, "start refused"));
        }
        self.record("started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop");
        Self::pause(&self.knobs.stop_delay_ms).await;
        if self.knobs.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::provider(&self.label, "stop refused"));
        }
        Ok(())
    }

    async fn detailed_health(&self) -> Result<DetailedHealth> {
        self.record("health");
        Self::pause(&self.knobs.health_delay_ms).await;
        let health = *self.knobs.health.lock().unwrap();
        Ok(match health {
            HealthStatus::Healthy => DetailedHealth::healthy(),
            HealthStatus::Degraded => DetailedHealth::degraded("mock degraded"),
            HealthStatus::Unhealthy => DetailedHealth::unhealthy("mock unhealthy"),
        })
    }

    async fn metrics(&self) -> Result<ProviderMetrics> {
        let records: u64 = self
            .data
            .lock()
            .unwrap()
            .values()
            .map(|records| records.len() as u64)
            .sum();
        Ok(ProviderMetrics {
            requests_total: 10,
            requests_failed: 1,
            avg_response_ms: 5.0,
            record_count: Some(records),
            data_size_bytes: Some(records * 100),
            ..ProviderMetrics::default()
        })
    }

    async fn validate_config(&self, settings: &Value) -> Result<()> {
        if settings.get("invalid").and_then(Value::as_bool) == Some(true) {
            return Err(Error::config_invalid("mock rejects invalid=true"));
        }
        Ok(())
    }

    async fn run_diagnostics(&self) -> Result<Vec<DiagnosticResult>> {
        if self.knobs.fail_diagnostics.load(Ordering::SeqCst) {
            Ok(vec![DiagnosticResult::fail("smoke", "mock diagnostics failing")])
        } else {
            Ok(vec![DiagnosticResult::pass("smoke")])
        }
    }

    fn setup_automation(&self) -> Option<&dyn SetupAutomation> {
        if self.setup { Some(self) } else { None }
    }
}

#[async_trait::async_trait]
impl SetupAutomation for MockProvider {
    fn can_auto_setup(&self) -> bool {
        true
    }

    async fn export_data(&self) -> Result<DataExport> {
        self.record("export");
        let mut export = DataExport::new(self.family.clone());
        export.collections = self.data.lock().unwrap().clone();
        Ok(export)
    }

    async fn import_data(&self, data: &DataExport) -> Result<ImportReport> {
        self.record("import");
        if self.knobs.fail_import.load(Ordering::SeqCst) {
            return Err(Error::provider(&self.label, "import refused"));
        }
        let drop = self.knobs.drop_on_import.load(Ordering::SeqCst) as usize;
        let mut report = ImportReport::default();
        let mut stored = self.data.lock().unwrap();
        for (collection, records) in &data.collections {
            let keep = records.len().saturating_sub(drop);
            let target = stored.entry(collection.clone()).or_default();
            target.extend(records.iter().take(keep).cloned());
            report.records_imported += records.len() as u64;
            report.bytes_imported += records.iter().map(|r| r.to_string().len() as u64).sum::<u64>();
        }
        Ok(report)
    }

    async fn create_backup(&self) -> Result<String> {
        self.record("backup");
        let id = format!("backup-{}", self.backups.lock().unwrap().len() + 1);
        let snapshot = self.data.lock().unwrap().clone();
        self.backups.lock().unwrap().insert(id.clone(), snapshot);
        Ok(id)
    }

    async fn restore_backup(&self, backup_id: &str) -> Result<()> {
        self.record("restore");
        let snapshot = self
            .backups
            .lock()
            .unwrap()
            .get(backup_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("backup {}", backup_id)))?;
        *self.data.lock().unwrap() = snapshot;
        Ok(())
    }
}

/// Factory producing [`MockProvider`] instances
pub struct MockFactory {
    provider_type: &'static str,
    category: &'static str,
    family: ProviderFamily,
    capabilities: Vec<String>,
    log: CallLog,
    instances: Instances,
}

impl ProviderFactory for MockFactory {
    fn provider_type(&self) -> &str {
        self.provider_type
    }

    fn category(&self) -> &str {
        self.category
    }

    fn family(&self) -> ProviderFamily {
        self.family.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn validate_config(&self, config: &ProviderConfig) -> Result<()> {
        if config.settings.get("label").and_then(Value::as_str).is_none() {
            return Err(Error::config_invalid("mock settings need a label"));
        }
        Ok(())
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        let label = config
            .settings
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("unlabelled")
            .to_string();
        let knobs = Arc::clone(
            self.instances
                .lock()
                .unwrap()
                .entry(label.clone())
                .or_default(),
        );
        Ok(Arc::new(MockProvider {
            label,
            family: self.family.clone(),
            setup: config.settings.get("setup").and_then(Value::as_bool) != Some(false),
            knobs,
            log: Arc::clone(&self.log),
            data: Mutex::new(BTreeMap::new()),
            backups: Mutex::new(BTreeMap::new()),
        }))
    }
}

/// Registry over the three mock types plus handles into their instances
///
/// - `mock-sql`: relational, category `database`
/// - `mock-doc`: document, category `database`
/// - `mock-cache`: key-value, category `cache`
pub struct Harness {
    pub registry: Arc<ProviderRegistry>,
    log: CallLog,
    instances: Instances,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let instances: Instances = Arc::new(Mutex::new(BTreeMap::new()));

        let mut factories = FactoryTable::new();
        for (provider_type, category, family, capabilities) in [
            (
                "mock-sql",
                "database",
                ProviderFamily::Relational,
                vec!["transactions", "joins"],
            ),
            (
                "mock-doc",
                "database",
                ProviderFamily::Document,
                vec!["nested_documents"],
            ),
            ("mock-cache", "cache", ProviderFamily::KeyValue, vec!["ttl"]),
        ] {
            factories.register(Arc::new(MockFactory {
                provider_type,
                category,
                family,
                capabilities: capabilities.into_iter().map(String::from).collect(),
                log: Arc::clone(&log),
                instances: Arc::clone(&instances),
            }));
        }

        Self {
            registry: Arc::new(ProviderRegistry::new(factories, config)),
            log,
            instances,
        }
    }

    /// Knobs of the instance created with `label` (created on first use)
    pub fn knobs(&self, label: &str) -> Arc<Knobs> {
        Arc::clone(
            self.instances
                .lock()
                .unwrap()
                .entry(label.to_string())
                .or_default(),
        )
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Labels that received `verb`, in call order
    pub fn calls_to(&self, verb: &str) -> Vec<String> {
        let prefix = format!("{}:", verb);
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Register `name` of `provider_type` with a label equal to its name
    pub async fn register(&self, name: &str, provider_type: &str) {
        self.registry
            .register_provider(name, provider_type, mock(name))
            .await
            .unwrap();
    }

    /// Collect every event into a shared vector
    pub fn record_events(&self) -> Arc<Mutex<Vec<ProviderEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.registry.subscribe_to_events(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        seen
    }
}

/// Short timeouts so failure paths finish quickly
pub fn fast_config() -> RegistryConfig {
    RegistryConfig {
        lifecycle_timeout_secs: 2,
        health_check_timeout_secs: 1,
        ..RegistryConfig::default()
    }
}

/// Mock settings addressed by `label`
pub fn mock(label: &str) -> ProviderConfig {
    ProviderConfig::new(json!({ "label": label }))
}

/// Mock settings with seeded records in one collection
pub fn seeded(label: &str, collection: &str, records: Vec<Value>) -> ProviderConfig {
    ProviderConfig::new(json!({ "label": label, "seed": { collection: records } }))
}

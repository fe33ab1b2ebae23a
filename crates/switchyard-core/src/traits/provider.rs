// # Provider Trait
//
// Defines the capability interface every interchangeable backend service
// implementation must satisfy.
//
// ## Implementations
//
// - In-memory stores: `switchyard-provider-memory` crate
// - Future: relational engines, token issuers, object storage, mailers
//
// ## Usage
//
// ```rust,ignore
// use switchyard_core::Provider;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let provider = /* Provider implementation */;
//
//     provider.configure(&serde_json::json!({ "max_records": 1000 })).await?;
//     provider.start().await?;
//
//     let health = provider.detailed_health().await?;
//     println!("{:?}", health.health);
//
//     if let Some(setup) = provider.setup_automation() {
//         let backup_id = setup.create_backup().await?;
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::capabilities::{MultiService, SetupAutomation, WizardIntegration};

/// Lifecycle status of a provider instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Stopped,
    Starting,
    Active,
    Degraded,
    Failed,
}

impl ProviderStatus {
    /// Whether the instance is serving requests
    pub fn is_running(&self) -> bool {
        matches!(self, ProviderStatus::Active | ProviderStatus::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Stopped => "stopped",
            ProviderStatus::Starting => "starting",
            ProviderStatus::Active => "active",
            ProviderStatus::Degraded => "degraded",
            ProviderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a provider instance as last reported by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `Provider::detailed_health()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedHealth {
    /// Overall health
    pub health: HealthStatus,
    /// Optional explanation (shown in events)
    pub message: Option<String>,
    /// Named sub-checks and whether they passed
    #[serde(default)]
    pub checks: BTreeMap<String, bool>,
    /// Performance counters at probe time
    #[serde(default)]
    pub performance: PerformanceCounters,
}

impl DetailedHealth {
    pub fn healthy() -> Self {
        Self::with_status(HealthStatus::Healthy)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::with_status(HealthStatus::Degraded)
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::with_status(HealthStatus::Unhealthy)
        }
    }

    fn with_status(health: HealthStatus) -> Self {
        Self {
            health,
            message: None,
            checks: BTreeMap::new(),
            performance: PerformanceCounters::default(),
        }
    }
}

/// Request counters reported alongside health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_response_ms: f64,
}

/// Point-in-time metrics reported by `Provider::metrics()`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub avg_response_ms: f64,
    #[serde(default)]
    pub latency: LatencyPercentiles,
    #[serde(default)]
    pub resources: ResourceUsage,
    /// Bytes of application data held, when the provider stores data
    #[serde(default)]
    pub data_size_bytes: Option<u64>,
    /// Number of stored records, when the provider stores data
    #[serde(default)]
    pub record_count: Option<u64>,
    /// Provider-specific gauges
    #[serde(default)]
    pub custom: BTreeMap<String, f64>,
}

impl ProviderMetrics {
    /// Fraction of successful requests (1.0 when idle)
    pub fn success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            return 1.0;
        }
        let failed = self.requests_failed.min(self.requests_total);
        (self.requests_total - failed) as f64 / self.requests_total as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub connections: u32,
}

/// Outcome of one named diagnostic probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub name: String,
    pub passed: bool,
    pub message: Option<String>,
}

impl DiagnosticResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// Trait for provider implementations
///
/// A provider is one interchangeable implementation of a backend service
/// (a database engine, an auth engine, a storage or email backend). The
/// registry owns every instance and drives it exclusively through this trait.
///
/// # Thread Safety
///
/// Implementations must be thread-safe: the registry shares each instance
/// between the lifecycle path, the supervision loops and the migration
/// engine. Methods take `&self`; keep mutable state behind interior
/// mutability.
///
/// # Trust Level: Managed
///
/// ## Allowed Capabilities
/// - ✅ Own and manage internal resources (connections, sessions, files)
/// - ✅ Report health, metrics and diagnostics on demand
/// - ✅ Return errors from any lifecycle verb (the registry records them)
///
/// ## Forbidden Capabilities
/// - ❌ Access other providers (dependencies are ordered by the registry)
/// - ❌ Restart itself or implement failover (owned by the registry)
/// - ❌ Enforce its own lifecycle timeouts (owned by the registry)
///
/// # Optional Capabilities
///
/// Setup automation, multi-service and wizard integration are discovered by
/// presence: the capability accessors return `None` by default and
/// callers probe them before use. Absence never raises an error by itself.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Validate and store configuration
    ///
    /// Must fail with [`crate::Error::ConfigInvalid`] when `settings` is
    /// rejected; a rejected configuration must leave the previous one in place.
    async fn configure(&self, settings: &serde_json::Value) -> Result<(), crate::Error>;

    /// Acquire resources and begin serving
    async fn start(&self) -> Result<(), crate::Error>;

    /// Release resources
    async fn stop(&self) -> Result<(), crate::Error>;

    /// Stop then start
    ///
    /// The registry publishes `starting` for the whole call, so callers never
    /// observe an intermediate active state.
    async fn restart(&self) -> Result<(), crate::Error> {
        self.stop().await?;
        self.start().await
    }

    /// Current health plus performance counters
    async fn detailed_health(&self) -> Result<DetailedHealth, crate::Error>;

    /// Point-in-time counters
    async fn metrics(&self) -> Result<ProviderMetrics, crate::Error>;

    /// Dry-run validation of new settings
    async fn validate_config(&self, settings: &serde_json::Value) -> Result<(), crate::Error>;

    /// Validate then apply new settings
    async fn update_config(&self, settings: &serde_json::Value) -> Result<(), crate::Error> {
        self.validate_config(settings).await?;
        self.configure(settings).await
    }

    /// Run the provider's named pass/fail probes
    async fn run_diagnostics(&self) -> Result<Vec<DiagnosticResult>, crate::Error> {
        Ok(Vec::new())
    }

    /// Free-form debugging snapshot
    fn debug_info(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Feature strings advertised by this instance (e.g. "transactions")
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Bulk export/import and backup/restore, when supported
    fn setup_automation(&self) -> Option<&dyn SetupAutomation> {
        None
    }

    /// Sub-service toggling, when supported
    fn multi_service(&self) -> Option<&dyn MultiService> {
        None
    }

    /// Wizard-driven configuration, when supported
    fn wizard(&self) -> Option<&dyn WizardIntegration> {
        None
    }
}

// # Optional Provider Capabilities
//
// Capabilities a provider may expose through the presence accessors on
// [`Provider`](super::Provider). None of them is required; callers must probe
// before use.
//
// - [`SetupAutomation`]: bulk export/import and backup/restore of managed data
// - [`MultiService`]: independently toggled sub-services
// - [`WizardIntegration`]: step-by-step guided configuration

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::factory::ProviderFamily;

/// Portable snapshot of a provider's application data
///
/// Records are grouped by collection (a table, a document collection, a
/// bucket prefix). The `family` tells importers which shape the records have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataExport {
    pub family: ProviderFamily,
    pub collections: BTreeMap<String, Vec<serde_json::Value>>,
    pub exported_at: chrono::DateTime<chrono::Utc>,
}

impl DataExport {
    pub fn new(family: ProviderFamily) -> Self {
        Self {
            family,
            collections: BTreeMap::new(),
            exported_at: chrono::Utc::now(),
        }
    }

    /// Total number of records across all collections
    pub fn record_count(&self) -> u64 {
        self.collections.values().map(|records| records.len() as u64).sum()
    }

    /// Serialized size of all records, used for transfer accounting
    pub fn size_bytes(&self) -> u64 {
        self.collections
            .values()
            .flatten()
            .map(|record| record.to_string().len() as u64)
            .sum()
    }
}

/// Counters returned by `SetupAutomation::import_data()`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub records_imported: u64,
    pub bytes_imported: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Bulk data movement and backup/restore
///
/// This is the only capability through which the migration engine moves
/// application data between providers.
#[async_trait]
pub trait SetupAutomation: Send + Sync {
    /// Whether the provider can provision itself without operator input
    fn can_auto_setup(&self) -> bool;

    /// Export every record the provider manages
    async fn export_data(&self) -> Result<DataExport, crate::Error>;

    /// Import records, merging into existing collections
    async fn import_data(&self, data: &DataExport) -> Result<ImportReport, crate::Error>;

    /// Snapshot the current data and return an opaque backup id
    async fn create_backup(&self) -> Result<String, crate::Error>;

    /// Replace the current data with a previous snapshot
    ///
    /// Fails with [`crate::Error::NotFound`] for an unknown backup id.
    async fn restore_backup(&self, backup_id: &str) -> Result<(), crate::Error>;
}

/// A sub-service offered by a multi-service provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

/// Providers bundling several independently switchable services
#[async_trait]
pub trait MultiService: Send + Sync {
    fn available_services(&self) -> Vec<ServiceDescriptor>;

    async fn enable_service(&self, service: &str) -> Result<(), crate::Error>;

    async fn disable_service(&self, service: &str) -> Result<(), crate::Error>;
}

/// Input field of a wizard step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardField {
    pub name: String,
    pub label: String,
    pub required: bool,
    /// Never echo the value back (passwords, tokens)
    #[serde(default)]
    pub secret: bool,
}

/// One step of a guided configuration flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardStep {
    pub id: String,
    pub title: String,
    pub description: String,
    pub fields: Vec<WizardField>,
}

impl WizardStep {
    /// Check that every required field of this step is present and non-null
    pub fn missing_fields(&self, data: &serde_json::Value) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| field.required)
            .filter(|field| data.get(&field.name).is_none_or(|value| value.is_null()))
            .map(|field| field.name.clone())
            .collect()
    }
}

/// Wizard-driven configuration
#[async_trait]
pub trait WizardIntegration: Send + Sync {
    fn wizard_steps(&self) -> Vec<WizardStep>;

    /// Validate the data entered for one step without applying it
    fn validate_step(&self, step_id: &str, data: &serde_json::Value) -> Result<(), crate::Error>;

    /// Apply one step and return its result payload
    async fn execute_step(
        &self,
        step_id: &str,
        data: &serde_json::Value,
    ) -> Result<serde_json::Value, crate::Error>;
}

//! Provider factory trait
//!
//! One factory exists per provider type. It validates configuration,
//! instantiates providers and describes what an instance needs to run.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::capabilities::WizardStep;
use super::provider::Provider;
use crate::config::ProviderConfig;

/// Data model family of a provider type
///
/// Families drive migration compatibility: providers in the same family
/// exchange data without transformation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Relational,
    Document,
    KeyValue,
    ObjectStorage,
    Identity,
    Messaging,
    Other(String),
}

impl ProviderFamily {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderFamily::Relational => "relational",
            ProviderFamily::Document => "document",
            ProviderFamily::KeyValue => "key_value",
            ProviderFamily::ObjectStorage => "object_storage",
            ProviderFamily::Identity => "identity",
            ProviderFamily::Messaging => "messaging",
            ProviderFamily::Other(name) => name,
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources and network access an instance needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequirements {
    pub min_memory_mb: u64,
    pub min_disk_mb: u64,
    /// Outbound hosts or ports the provider must reach
    #[serde(default)]
    pub network: Vec<String>,
    /// Environment variables or secrets the provider reads
    #[serde(default)]
    pub secrets: Vec<String>,
}

/// Helper trait for constructing providers from configuration
pub trait ProviderFactory: Send + Sync {
    /// Type name this factory builds (e.g. "memory-sql")
    fn provider_type(&self) -> &str;

    /// Default category of built instances (e.g. "database")
    fn category(&self) -> &str;

    /// Data model family of built instances
    fn family(&self) -> ProviderFamily;

    fn description(&self) -> &str {
        ""
    }

    /// Feature strings every instance of this type advertises
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Validate configuration before instantiation
    ///
    /// # Returns
    ///
    /// - `Ok(())`: configuration is acceptable
    /// - `Err(Error::ConfigInvalid)`: configuration is rejected
    fn validate_config(&self, config: &ProviderConfig) -> Result<(), crate::Error>;

    /// Create a Provider instance from configuration
    ///
    /// The returned instance is not yet configured or started.
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>, crate::Error>;

    fn requirements(&self) -> ProviderRequirements {
        ProviderRequirements::default()
    }

    fn wizard_steps(&self) -> Vec<WizardStep> {
        Vec::new()
    }
}

//! Configuration types for the switchyard registry
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top-level configuration file format
///
/// ```json
/// {
///   "registry": { "health_check_interval_secs": 30 },
///   "migration": { "history_capacity": 50 },
///   "providers": {
///     "primary-db": { "type": "memory-sql", "settings": {} },
///     "sessions": {
///       "type": "memory-document",
///       "dependencies": [{ "name": "primary-db", "required": true }]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchyardConfig {
    /// Registry supervision settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Migration engine settings
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Provider instances keyed by logical name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderDefinition>,
}

impl SwitchyardConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.registry.validate()?;
        self.migration.validate()?;

        for (name, definition) in &self.providers {
            if name.trim().is_empty() {
                return Err(crate::Error::config_invalid("Provider name cannot be empty"));
            }
            definition.validate()?;
        }

        Ok(())
    }
}

/// A provider instance as declared in a configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDefinition {
    /// Factory type name (e.g. "memory-sql")
    #[serde(rename = "type")]
    pub provider_type: String,

    /// Instance configuration
    #[serde(flatten)]
    pub config: ProviderConfig,
}

impl ProviderDefinition {
    /// Validate the definition
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.provider_type.trim().is_empty() {
            return Err(crate::Error::config_invalid("Provider type cannot be empty"));
        }
        self.config.validate()
    }
}

/// Per-instance provider configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Category override; the factory's category is used when absent
    #[serde(default)]
    pub category: Option<String>,

    /// Human readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Free-form tags used by search
    #[serde(default)]
    pub tags: Vec<String>,

    /// Instances this one depends on
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,

    /// Make this instance the default for its category on registration
    #[serde(default)]
    pub make_default: bool,

    /// Provider-specific settings passed to the factory and `configure()`
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl ProviderConfig {
    /// Create an empty configuration with the given settings
    pub fn new(settings: serde_json::Value) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Add a required dependency
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(DependencySpec::required(name));
        self
    }

    /// Add an optional dependency
    pub fn optionally_depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(DependencySpec::optional(name));
        self
    }

    /// Override the factory category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Become the category default on registration
    pub fn as_default(mut self) -> Self {
        self.make_default = true;
        self
    }

    /// Validate the structural parts of the configuration
    ///
    /// Provider settings are validated by the owning factory.
    pub fn validate(&self) -> Result<(), crate::Error> {
        for dependency in &self.dependencies {
            if dependency.name.trim().is_empty() {
                return Err(crate::Error::config_invalid("Dependency name cannot be empty"));
            }
        }

        if let Some(category) = &self.category
            && category.trim().is_empty()
        {
            return Err(crate::Error::config_invalid("Category cannot be empty"));
        }

        Ok(())
    }
}

/// A declared dependency on another instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Logical name of the dependency
    pub name: String,

    /// Whether the dependency must exist and be active
    #[serde(default = "default_required")]
    pub required: bool,
}

impl DependencySpec {
    /// A required dependency
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    /// An optional dependency
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

fn default_required() -> bool {
    true
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Interval between health sweeps (in seconds)
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Interval between metrics snapshots (in seconds)
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,

    /// Deadline for a single health probe (in seconds)
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,

    /// Default deadline for start/stop when the caller gives none (in seconds)
    #[serde(default = "default_lifecycle_timeout_secs")]
    pub lifecycle_timeout_secs: u64,

    /// Maximum number of events kept in the history ring buffer
    #[serde(default = "default_event_history_capacity")]
    pub event_history_capacity: usize,

    /// Maximum number of metrics snapshots kept per provider
    #[serde(default = "default_metrics_history_capacity")]
    pub metrics_history_capacity: usize,

    /// Capacity of the broadcast channel behind `event_stream()`
    ///
    /// Slow stream consumers lag and skip events; callback listeners are
    /// unaffected.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Mean response time above which a provider is reported as a bottleneck
    #[serde(default = "default_bottleneck_threshold_ms")]
    pub bottleneck_threshold_ms: f64,

    /// Record healthy same-category alternatives when a provider turns unhealthy
    #[serde(default)]
    pub auto_failover: bool,
}

impl RegistryConfig {
    /// Validate the registry configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.health_check_interval_secs == 0 {
            return Err(crate::Error::config_invalid("Health check interval must be > 0"));
        }
        if self.metrics_interval_secs == 0 {
            return Err(crate::Error::config_invalid("Metrics interval must be > 0"));
        }
        if self.health_check_timeout_secs == 0 {
            return Err(crate::Error::config_invalid("Health check timeout must be > 0"));
        }
        if self.lifecycle_timeout_secs == 0 {
            return Err(crate::Error::config_invalid("Lifecycle timeout must be > 0"));
        }
        if self.event_history_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(crate::Error::config_invalid("Event capacities must be > 0"));
        }
        if self.metrics_history_capacity == 0 {
            return Err(crate::Error::config_invalid("Metrics history capacity must be > 0"));
        }
        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle_timeout_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval_secs(),
            metrics_interval_secs: default_metrics_interval_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            lifecycle_timeout_secs: default_lifecycle_timeout_secs(),
            event_history_capacity: default_event_history_capacity(),
            metrics_history_capacity: default_metrics_history_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
            bottleneck_threshold_ms: default_bottleneck_threshold_ms(),
            auto_failover: false,
        }
    }
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_health_check_timeout_secs() -> u64 {
    10
}

fn default_lifecycle_timeout_secs() -> u64 {
    30
}

fn default_event_history_capacity() -> usize {
    1000
}

fn default_metrics_history_capacity() -> usize {
    100
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_bottleneck_threshold_ms() -> f64 {
    1000.0
}

/// Migration engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Maximum number of finished migrations kept for audit
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Source data size above which a migration is considered large
    #[serde(default = "default_large_data_threshold_bytes")]
    pub large_data_threshold_bytes: u64,

    /// Deadline for a single migration step (in seconds)
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl MigrationConfig {
    /// Validate the migration configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.history_capacity == 0 {
            return Err(crate::Error::config_invalid("Migration history capacity must be > 0"));
        }
        if self.step_timeout_secs == 0 {
            return Err(crate::Error::config_invalid("Migration step timeout must be > 0"));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            large_data_threshold_bytes: default_large_data_threshold_bytes(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

fn default_history_capacity() -> usize {
    50
}

fn default_large_data_threshold_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_step_timeout_secs() -> u64 {
    600
}

//! Core traits for the switchyard registry
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`Provider`]: Lifecycle, health, metrics and diagnostics of one service instance
//! - [`ProviderFactory`]: Validates configuration and instantiates providers
//! - [`SetupAutomation`], [`MultiService`], [`WizardIntegration`]: Optional capabilities
//! - [`ConfigSource`]: Named configuration sets per provider type

pub mod capabilities;
pub mod config_source;
pub mod factory;
pub mod provider;

pub use capabilities::{
    DataExport, ImportReport, MultiService, ServiceDescriptor, SetupAutomation, WizardField,
    WizardIntegration, WizardStep,
};
pub use config_source::ConfigSource;
pub use factory::{ProviderFactory, ProviderFamily, ProviderRequirements};
pub use provider::{
    DetailedHealth, DiagnosticResult, HealthStatus, LatencyPercentiles, PerformanceCounters,
    Provider, ProviderMetrics, ProviderStatus, ResourceUsage,
};

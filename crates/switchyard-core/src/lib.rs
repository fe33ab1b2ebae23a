// # switchyard-core
//
// Core library for managing swappable backend providers.
//
// ## Architecture Overview
//
// - **Provider**: Trait every backend instance implements (lifecycle, health,
//   metrics, config validation)
// - **ProviderFactory**: Plugin entry point; creates instances of one type
// - **ConfigSource**: Where instance definitions come from (file, env, memory)
// - **ProviderRegistry**: Owns live instances, their dependency graph,
//   category defaults, events and metrics history
// - **Supervisor**: Background health and metrics sweeps
// - **MigrationEngine**: Plans and runs moves from one instance to another
//
// ## Design Principles
//
// 1. **Plugin-Based**: Types are registered as factories, never matched by name
// 2. **Library-First**: Everything the daemon does is available as a library
// 3. **Explicit Ordering**: Startup and shutdown follow the dependency graph
// 4. **Observable**: Every state change is published as a `ProviderEvent`

pub mod config;
pub mod error;
pub mod migration;
pub mod registry;
pub mod source;
pub mod traits;

// Re-export core types for convenience
pub use config::{
    DependencySpec, MigrationConfig, ProviderConfig, ProviderDefinition, RegistryConfig,
    SwitchyardConfig,
};
pub use error::{Error, ErrorKind, Result};
pub use migration::{ExecuteOptions, MigrationEngine, MigrationPlan, MigrationProgress, TargetSpec};
pub use registry::{
    EventType, FactoryTable, LifecycleOptions, ProviderEvent, ProviderInfo, ProviderQuery,
    ProviderRegistry, Supervisor,
};
pub use source::{EnvConfigSource, FileConfigSource, MemoryConfigSource};
pub use traits::{
    ConfigSource, HealthStatus, Provider, ProviderFactory, ProviderFamily, ProviderStatus,
    SetupAutomation,
};

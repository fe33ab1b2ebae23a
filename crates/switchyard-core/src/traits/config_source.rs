// # Configuration Source Trait
//
// Defines the interface for supplying named provider configuration sets.
//
// ## Purpose
//
// Configuration sources decouple where provider settings live from the
// registry that consumes them:
// - Programmatic sets built by an embedding application
// - JSON files on disk
// - Environment variables injected by a secret store or orchestrator
//
// ## Implementations
//
// - `MemoryConfigSource`, `FileConfigSource`, `EnvConfigSource` (see `source/`)
//
// ## Usage
//
// ```rust,ignore
// use switchyard_core::ConfigSource;
//
// let config = source.get_provider_config("memory-sql", "primary-db").await?;
// if let Some(config) = config {
//     registry.register_provider("primary-db", "memory-sql", config).await?;
// }
//
// // Pick up edits
// source.reload_config().await?;
// ```

use async_trait::async_trait;

use crate::config::ProviderConfig;

/// Trait for configuration source implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: External Collaborator
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O to read configuration (files, environment, secret stores)
/// - ✅ Cache configuration in memory between reloads
///
/// ## Forbidden Capabilities
/// - ❌ Register or mutate providers (owned by `ProviderRegistry`)
/// - ❌ Validate provider settings (owned by each `ProviderFactory`)
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Get the configuration for one named instance of a provider type
    ///
    /// # Returns
    ///
    /// - `Ok(Some(config))`: configuration found
    /// - `Ok(None)`: no configuration for this type/name pair
    /// - `Err(Error)`: the source could not be read
    async fn get_provider_config(
        &self,
        provider_type: &str,
        name: &str,
    ) -> Result<Option<ProviderConfig>, crate::Error>;

    /// List every `(name, provider_type)` pair this source knows about
    async fn list_providers(&self) -> Result<Vec<(String, String)>, crate::Error>;

    /// Re-read the underlying storage
    async fn reload_config(&self) -> Result<(), crate::Error>;

    /// Source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}

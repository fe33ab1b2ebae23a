// # Memory Configuration Source
//
// In-memory implementation of ConfigSource.
//
// ## Purpose
//
// Lets an embedding application assemble provider configuration in code
// (tests, wizards that collected settings interactively, generated setups).
// `reload_config()` is a no-op: the map is always current.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::ProviderConfig;
use crate::traits::ConfigSource;

/// In-memory configuration source
///
/// Entries are keyed by `(provider_type, name)`.
///
/// # Example
///
/// ```rust,no_run
/// use switchyard_core::config::ProviderConfig;
/// use switchyard_core::source::MemoryConfigSource;
/// use switchyard_core::traits::ConfigSource;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let source = MemoryConfigSource::new();
///     source.insert("memory-sql", "primary-db", ProviderConfig::default()).await;
///
///     let config = source.get_provider_config("memory-sql", "primary-db").await?;
///     assert!(config.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigSource {
    inner: Arc<RwLock<BTreeMap<(String, String), ProviderConfig>>>,
}

impl MemoryConfigSource {
    /// Create a new empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the configuration of one instance
    pub async fn insert(
        &self,
        provider_type: impl Into<String>,
        name: impl Into<String>,
        config: ProviderConfig,
    ) {
        let mut guard = self.inner.write().await;
        guard.insert((provider_type.into(), name.into()), config);
    }

    /// Remove the configuration of one instance
    pub async fn remove(&self, provider_type: &str, name: &str) -> Option<ProviderConfig> {
        let mut guard = self.inner.write().await;
        guard.remove(&(provider_type.to_string(), name.to_string()))
    }

    /// Get the number of configured instances
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn get_provider_config(
        &self,
        provider_type: &str,
        name: &str,
    ) -> Result<Option<ProviderConfig>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(&(provider_type.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_providers(&self) -> Result<Vec<(String, String)>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .keys()
            .map(|(provider_type, name)| (name.clone(), provider_type.clone()))
            .collect())
    }

    async fn reload_config(&self) -> Result<(), Error> {
        // Always current
        Ok(())
    }

    fn source_name(&self) -> &'static str {
        "memory"
    }
}

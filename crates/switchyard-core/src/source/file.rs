// # File Configuration Source
//
// JSON file implementation of ConfigSource with safe reloads.
//
// ## Reload Behavior
//
// - The file is parsed and validated as a whole before it replaces the
//   current snapshot
// - A corrupted or invalid file on reload keeps the last known good snapshot
//   and the reload returns the error
// - A corrupted file on first load is an error (there is nothing to fall
//   back to)
//
// ## File Format
//
// See [`SwitchyardConfig`](crate::config::SwitchyardConfig).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::{ProviderConfig, SwitchyardConfig};
use crate::traits::ConfigSource;

/// File-based configuration source
///
/// # Example
///
/// ```rust,no_run
/// use switchyard_core::source::FileConfigSource;
/// use switchyard_core::traits::ConfigSource;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let source = FileConfigSource::load("/etc/switchyard/providers.json").await?;
///
///     for (name, provider_type) in source.list_providers().await? {
///         println!("{} ({})", name, provider_type);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileConfigSource {
    path: PathBuf,
    snapshot: Arc<RwLock<SwitchyardConfig>>,
}

impl FileConfigSource {
    /// Load and validate a configuration file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let config = Self::read_config(&path).await?;

        tracing::debug!(
            "Loaded configuration from {}: {} provider(s)",
            path.display(),
            config.providers.len()
        );

        Ok(Self {
            path,
            snapshot: Arc::new(RwLock::new(config)),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The full current configuration (registry and migration sections included)
    pub async fn config(&self) -> SwitchyardConfig {
        self.snapshot.read().await.clone()
    }

    async fn read_config(path: &Path) -> Result<SwitchyardConfig, Error> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::config_invalid(format!(
                "Failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: SwitchyardConfig = serde_json::from_str(&content).map_err(|e| {
            Error::config_invalid(format!(
                "Failed to parse configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn get_provider_config(
        &self,
        provider_type: &str,
        name: &str,
    ) -> Result<Option<ProviderConfig>, Error> {
        let guard = self.snapshot.read().await;
        Ok(guard
            .providers
            .get(name)
            .filter(|definition| definition.provider_type == provider_type)
            .map(|definition| definition.config.clone()))
    }

    async fn list_providers(&self) -> Result<Vec<(String, String)>, Error> {
        let guard = self.snapshot.read().await;
        Ok(guard
            .providers
            .iter()
            .map(|(name, definition)| (name.clone(), definition.provider_type.clone()))
            .collect())
    }

    async fn reload_config(&self) -> Result<(), Error> {
        match Self::read_config(&self.path).await {
            Ok(config) => {
                let mut guard = self.snapshot.write().await;
                *guard = config;
                tracing::info!("Reloaded configuration from {}", self.path.display());
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    "Configuration reload failed, keeping last known good snapshot: {}",
                    e
                );
                Err(e)
            }
        }
    }

    fn source_name(&self) -> &'static str {
        "file"
    }
}

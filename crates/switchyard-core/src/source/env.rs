// # Environment Configuration Source
//
// Reads one provider definition per environment variable.
//
// ## Variable Format
//
// ```bash
// export SWITCHYARD_PROVIDER_PRIMARY_DB='{"type":"memory-sql","tags":["main"]}'
// export SWITCHYARD_PROVIDER_SESSIONS='{"name":"sessions","type":"memory-document"}'
// ```
//
// The instance name is the JSON `name` field when present, otherwise the
// variable suffix lowercased with `_` replaced by `-` (`PRIMARY_DB` becomes
// `primary-db`). Secret stores and orchestrators typically inject these.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::{ProviderConfig, ProviderDefinition};
use crate::traits::ConfigSource;

/// Default variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "SWITCHYARD_PROVIDER_";

#[derive(Debug, Deserialize)]
struct EnvProviderDefinition {
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    definition: ProviderDefinition,
}

#[derive(Debug, Clone)]
enum VarOrigin {
    /// Re-read the process environment on every reload
    Process,
    /// Fixed variable list (tests, embedders passing their own map)
    Fixed(Vec<(String, String)>),
}

/// Environment variable configuration source
#[derive(Debug, Clone)]
pub struct EnvConfigSource {
    prefix: String,
    origin: VarOrigin,
    definitions: Arc<RwLock<BTreeMap<String, ProviderDefinition>>>,
}

impl EnvConfigSource {
    /// Snapshot the process environment using `prefix`
    pub fn from_env(prefix: impl Into<String>) -> Result<Self, Error> {
        Self::build(prefix.into(), VarOrigin::Process)
    }

    /// Use an explicit variable list instead of the process environment
    pub fn from_vars<I, K, V>(prefix: impl Into<String>, vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::build(prefix.into(), VarOrigin::Fixed(vars))
    }

    fn build(prefix: String, origin: VarOrigin) -> Result<Self, Error> {
        let definitions = Self::parse(&prefix, Self::vars(&origin))?;
        Ok(Self {
            prefix,
            origin,
            definitions: Arc::new(RwLock::new(definitions)),
        })
    }

    fn vars(origin: &VarOrigin) -> Vec<(String, String)> {
        match origin {
            VarOrigin::Process => std::env::vars().collect(),
            VarOrigin::Fixed(vars) => vars.clone(),
        }
    }

    fn parse(
        prefix: &str,
        vars: Vec<(String, String)>,
    ) -> Result<BTreeMap<String, ProviderDefinition>, Error> {
        let mut definitions = BTreeMap::new();

        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(prefix) else {
                continue;
            };
            if suffix.is_empty() {
                continue;
            }

            let parsed: EnvProviderDefinition = serde_json::from_str(&value).map_err(|e| {
                Error::config_invalid(format!("Variable {} is not a provider definition: {}", key, e))
            })?;
            parsed.definition.validate()?;

            let name = parsed
                .name
                .unwrap_or_else(|| suffix.to_lowercase().replace('_', "-"));
            definitions.insert(name, parsed.definition);
        }

        Ok(definitions)
    }

    /// Variable prefix this source reads
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl ConfigSource for EnvConfigSource {
    async fn get_provider_config(
        &self,
        provider_type: &str,
        name: &str,
    ) -> Result<Option<ProviderConfig>, Error> {
        let guard = self.definitions.read().await;
        Ok(guard
            .get(name)
            .filter(|definition| definition.provider_type == provider_type)
            .map(|definition| definition.config.clone()))
    }

    async fn list_providers(&self) -> Result<Vec<(String, String)>, Error> {
        let guard = self.definitions.read().await;
        Ok(guard
            .iter()
            .map(|(name, definition)| (name.clone(), definition.provider_type.clone()))
            .collect())
    }

    async fn reload_config(&self) -> Result<(), Error> {
        let definitions = Self::parse(&self.prefix, Self::vars(&self.origin))?;
        let mut guard = self.definitions.write().await;
        *guard = definitions;
        Ok(())
    }

    fn source_name(&self) -> &'static str {
        "env"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_env_source_derives_names_from_suffix() {
        let source = EnvConfigSource::from_vars(
            DEFAULT_ENV_PREFIX,
            vec![
                ("SWITCHYARD_PROVIDER_PRIMARY_DB", r#"{"type":"memory-sql","tags":["main"]}"#),
                ("SWITCHYARD_PROVIDER_X", r#"{"name":"sessions","type":"memory-document"}"#),
                ("UNRELATED", "ignored"),
            ],
        )
        .unwrap();

        let config = source
            .get_provider_config("memory-sql", "primary-db")
            .await
            .unwrap()
            .expect("derived name");
        assert_eq!(config.tags, vec!["main".to_string()]);

        assert!(
            source
                .get_provider_config("memory-document", "sessions")
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(source.list_providers().await.unwrap().len(), 2);
    }

    #[test]
    fn test_env_source_rejects_malformed_json() {
        let result = EnvConfigSource::from_vars(
            DEFAULT_ENV_PREFIX,
            vec![("SWITCHYARD_PROVIDER_BROKEN", "not json")],
        );
        assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::ConfigInvalid);
    }
}

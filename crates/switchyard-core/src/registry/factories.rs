//! Static provider factory table
//!
//! The table maps provider type names to factory objects. It is assembled
//! once at process start and handed to [`ProviderRegistry::new`], so the set
//! of known types never changes while providers are running.
//!
//! ## Registration
//!
//! Provider crates expose a `register` function:
//!
//! ```rust,ignore
//! // In switchyard-provider-memory
//! pub fn register(table: &mut FactoryTable) {
//!     table.register(Arc::new(MemorySqlFactory));
//!     table.register(Arc::new(MemoryDocumentFactory));
//! }
//! ```
//!
//! [`ProviderRegistry::new`]: super::ProviderRegistry::new

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::traits::{ProviderFactory, ProviderFamily, ProviderRequirements, WizardStep};

/// Static registration table of provider factories
#[derive(Default, Clone)]
pub struct FactoryTable {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

/// Serializable description of a registered provider type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactoryDescriptor {
    pub provider_type: String,
    pub category: String,
    pub family: ProviderFamily,
    pub description: String,
    pub capabilities: Vec<String>,
    pub requirements: ProviderRequirements,
    pub wizard_steps: Vec<WizardStep>,
}

impl FactoryTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its own `provider_type()`
    ///
    /// A factory registered twice for the same type replaces the first one.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) -> &mut Self {
        let provider_type = factory.provider_type().to_string();
        if self.factories.insert(provider_type.clone(), factory).is_some() {
            tracing::warn!("Replacing factory for provider type {}", provider_type);
        }
        self
    }

    /// Get a factory by type name
    pub fn get(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| Error::unknown_type(provider_type))
    }

    pub fn contains(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// Registered type names, sorted
    pub fn provider_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Describe one registered type
    pub fn describe(&self, provider_type: &str) -> Result<FactoryDescriptor> {
        self.get(provider_type).map(|factory| describe(factory.as_ref()))
    }

    /// Describe every registered type
    pub fn descriptors(&self) -> Vec<FactoryDescriptor> {
        self.factories
            .values()
            .map(|factory| describe(factory.as_ref()))
            .collect()
    }

    /// Run the factory's validation for `provider_type`
    pub fn validate(&self, provider_type: &str, config: &ProviderConfig) -> Result<()> {
        self.get(provider_type)?.validate_config(config)
    }
}

fn describe(factory: &dyn ProviderFactory) -> FactoryDescriptor {
    FactoryDescriptor {
        provider_type: factory.provider_type().to_string(),
        category: factory.category().to_string(),
        family: factory.family(),
        description: factory.description().to_string(),
        capabilities: factory.capabilities(),
        requirements: factory.requirements(),
        wizard_steps: factory.wizard_steps(),
    }
}

impl std::fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryTable")
            .field("provider_types", &self.provider_types())
            .finish()
    }
}

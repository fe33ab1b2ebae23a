//! Provider registry
//!
//! The registry is the central catalog of live provider instances. It owns
//! every instance for its whole lifetime, the dependency graph between them,
//! per-category default pointers, the bounded event history and the rolling
//! metrics history.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use switchyard_core::config::{ProviderConfig, RegistryConfig};
//! use switchyard_core::registry::{FactoryTable, LifecycleOptions, ProviderRegistry};
//!
//! let mut factories = FactoryTable::new();
//! switchyard_provider_memory::register(&mut factories);
//!
//! let registry = ProviderRegistry::new(factories, RegistryConfig::default());
//! registry.register_provider("primary-db", "memory-sql", ProviderConfig::default()).await?;
//! registry
//!     .register_provider("sessions", "memory-document", ProviderConfig::default().depends_on("primary-db"))
//!     .await?;
//!
//! // primary-db is started before sessions
//! registry.start_all_providers(LifecycleOptions::default()).await?;
//! ```
//!
//! ## Locking
//!
//! - Map, graph and default pointers live behind one `RwLock`, never held
//!   across a provider call
//! - Each instance has its own lifecycle mutex; start, stop, restart, config
//!   updates and unregistration of the same instance are serialized on it
//! - Queries copy [`ProviderInfo`] snapshots out of the lock

pub mod events;
pub mod factories;
pub mod graph;
pub mod query;
pub mod supervisor;

pub use events::{EventListener, EventType, ProviderEvent, Severity, Subscription};
pub use factories::{FactoryDescriptor, FactoryTable};
pub use graph::{DependencyEdge, DependencyGraph};
pub use query::{ProviderInfo, ProviderQuery};
pub use supervisor::Supervisor;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

use crate::config::{DependencySpec, ProviderConfig, RegistryConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::traits::{
    ConfigSource, DetailedHealth, DiagnosticResult, HealthStatus, Provider, ProviderMetrics,
    ProviderStatus, ServiceDescriptor, WizardStep,
};
use events::{EventBus, EventDraft};

/// Options for single-instance and batch lifecycle operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Deadline per instance; the registry default applies when `None`
    pub timeout: Option<Duration>,
    /// Best-effort: keep going past failures and ignore dependency checks
    pub force: bool,
    /// Start dependencies first / stop dependents first
    pub dependencies: bool,
    /// Extra start attempts after a failed one
    pub retries: u32,
}

impl LifecycleOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_dependencies(mut self) -> Self {
        self.dependencies = true;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// One failed instance in a [`BatchReport`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
    /// Not attempted because a required dependency is not active
    pub skipped: Vec<String>,
    /// Already in the requested state
    pub already: Vec<String>,
}

impl BatchReport {
    /// No failures and nothing skipped
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    fn fail(&mut self, name: &str, error: &Error) {
        self.failed.push(BatchFailure {
            name: name.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

/// One point of a provider's rolling metrics history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: ProviderMetrics,
}

/// Per-provider line of the aggregate report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderPerformance {
    pub name: String,
    pub requests_total: u64,
    pub success_rate: f64,
    pub avg_response_ms: f64,
}

/// Report built from the latest snapshot of every provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub providers: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Request-weighted mean response time
    pub avg_response_ms: f64,
    /// Best success rate first, faster first on ties (at most five)
    pub top_performers: Vec<ProviderPerformance>,
    /// Above the bottleneck threshold, slowest first
    pub bottlenecks: Vec<ProviderPerformance>,
}

const TOP_PERFORMERS: usize = 5;

enum Outcome {
    Done,
    Already,
}

struct ProviderEntry {
    provider: Arc<dyn Provider>,
    lifecycle: Arc<Mutex<()>>,
    info: ProviderInfo,
    metrics_history: VecDeque<MetricsSnapshot>,
}

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<String, ProviderEntry>,
    graph: DependencyGraph,
    /// category -> default instance
    defaults: BTreeMap<String, String>,
    /// category -> healthy alternative recorded by auto-failover
    failover: BTreeMap<String, String>,
}

impl RegistryState {
    fn entry(&self, name: &str) -> Result<&ProviderEntry> {
        self.entries.get(name).ok_or_else(|| missing(name))
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut ProviderEntry> {
        self.entries.get_mut(name).ok_or_else(|| missing(name))
    }

    fn snapshot(&self, name: &str, entry: &ProviderEntry) -> ProviderInfo {
        let mut info = entry.info.clone();
        info.dependencies = self
            .graph
            .dependencies_of(name)
            .iter()
            .map(|edge| DependencySpec {
                name: edge.target.clone(),
                required: edge.required,
            })
            .collect();
        info
    }

    /// First required dependency of `name` that is not running
    fn unready_dependency(&self, name: &str) -> Option<String> {
        self.graph
            .dependencies_of(name)
            .iter()
            .filter(|edge| edge.required)
            .find(|edge| {
                self.entries
                    .get(&edge.target)
                    .is_none_or(|entry| !entry.info.status.is_running())
            })
            .map(|edge| edge.target.clone())
    }

    /// Healthy, active same-category instance other than `name`
    fn healthy_alternative(&self, category: &str, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(other, entry)| {
                other.as_str() != name
                    && entry.info.category == category
                    && entry.info.health == HealthStatus::Healthy
                    && entry.info.status == ProviderStatus::Active
            })
            .map(|(other, _)| other.clone())
    }
}

fn missing(name: &str) -> Error {
    Error::not_found(format!("provider '{}'", name))
}

/// Normalize an error returned by a lifecycle verb
fn lifecycle_error(name: &str, error: Error) -> Error {
    match error {
        Error::ProviderFailure { .. } | Error::StartupTimeout { .. } => error,
        other => Error::provider(name, other.to_string()),
    }
}

/// Central catalog of provider instances
pub struct ProviderRegistry {
    factories: FactoryTable,
    config: RegistryConfig,
    state: RwLock<RegistryState>,
    events: EventBus,
}

impl ProviderRegistry {
    /// Create an empty registry over a static factory table
    ///
    /// Zero capacities and intervals are raised to one so an unvalidated
    /// config cannot stall eviction or the supervisor.
    pub fn new(factories: FactoryTable, mut config: RegistryConfig) -> Self {
        config.metrics_history_capacity = config.metrics_history_capacity.max(1);
        config.health_check_interval_secs = config.health_check_interval_secs.max(1);
        config.metrics_interval_secs = config.metrics_interval_secs.max(1);
        let events = EventBus::new(config.event_history_capacity, config.event_channel_capacity);
        Self {
            factories,
            config,
            state: RwLock::new(RegistryState::default()),
            events,
        }
    }

    /// Factory table this registry creates instances from
    pub fn factories(&self) -> &FactoryTable {
        &self.factories
    }

    /// Effective configuration, after zero values were raised
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub(crate) fn emit(&self, draft: EventDraft) -> ProviderEvent {
        self.events.emit(draft)
    }

    fn emit_all(&self, drafts: Vec<EventDraft>) {
        for draft in drafts {
            self.events.emit(draft);
        }
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Register a new instance of `provider_type` under `name`
    ///
    /// The instance is created, configured and stored as
    /// `stopped`/`unhealthy`; it is not started.
    ///
    /// # Errors
    ///
    /// - `UnknownProviderType`: no factory for `provider_type`
    /// - `ConfigInvalid`: factory or provider rejected the configuration
    /// - `InvalidState`: `name` is already registered
    /// - `UnresolvedDependency`: a required dependency is not registered
    /// - `CircularDependency`: the declared edges would close a cycle
    pub async fn register_provider(
        &self,
        name: impl Into<String>,
        provider_type: &str,
        config: ProviderConfig,
    ) -> Result<ProviderInfo> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::config_invalid("Provider name cannot be empty"));
        }

        let factory = Arc::clone(self.factories.get(provider_type)?);
        config.validate()?;
        factory.validate_config(&config)?;

        {
            let state = self.state.read().await;
            self.check_registrable(&state, &name, &config)?;
        }

        let provider = factory.create(&config)?;
        provider
            .configure(&config.settings)
            .await
            .map_err(|e| match e {
                Error::ConfigInvalid(_) => e,
                other => Error::config_invalid(format!("{} rejected settings: {}", name, other)),
            })?;

        let mut capabilities: BTreeSet<String> = factory.capabilities().into_iter().collect();
        capabilities.extend(provider.capabilities());

        let category = config
            .category
            .clone()
            .unwrap_or_else(|| factory.category().to_string());

        let info = ProviderInfo {
            name: name.clone(),
            provider_type: provider_type.to_string(),
            category: category.clone(),
            family: factory.family(),
            description: config
                .description
                .clone()
                .unwrap_or_else(|| factory.description().to_string()),
            capabilities: capabilities.into_iter().collect(),
            tags: config.tags.clone(),
            status: ProviderStatus::Stopped,
            health: HealthStatus::Unhealthy,
            config: config.clone(),
            dependencies: Vec::new(),
            multi_service: provider.multi_service().is_some(),
            auto_setup: provider
                .setup_automation()
                .is_some_and(|setup| setup.can_auto_setup()),
            registered_at: Utc::now(),
            started_at: None,
            last_health_check: None,
            error_count: 0,
            warning_count: 0,
        };

        let mut drafts = Vec::new();
        let snapshot = {
            let mut state = self.state.write().await;
            // Re-check: another registration may have raced us
            self.check_registrable(&state, &name, &config)?;

            let mut graph = state.graph.clone();
            graph.add_node(name.clone());
            for dependency in &config.dependencies {
                graph.add_edge(&name, &dependency.name, dependency.required)?;
            }
            state.graph = graph;

            let previous_default = state.defaults.get(&category).cloned();
            if config.make_default || previous_default.is_none() {
                state.defaults.insert(category.clone(), name.clone());
                if let Some(previous) = previous_default {
                    drafts.push(
                        EventDraft::info(EventType::DefaultProviderChanged, &name).with_payload(
                            json!({ "category": category, "previous": previous }),
                        ),
                    );
                }
            }

            let entry = ProviderEntry {
                provider,
                lifecycle: Arc::new(Mutex::new(())),
                info,
                metrics_history: VecDeque::new(),
            };
            let snapshot = state.snapshot(&name, &entry);
            state.entries.insert(name.clone(), entry);
            snapshot
        };

        info!(
            "Registered provider {} (type: {}, category: {})",
            name, provider_type, category
        );
        self.emit(
            EventDraft::info(EventType::ProviderRegistered, &name)
                .with_payload(json!({ "provider_type": provider_type, "category": category })),
        );
        self.emit_all(drafts);

        Ok(snapshot)
    }

    fn check_registrable(
        &self,
        state: &RegistryState,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<()> {
        if state.entries.contains_key(name) {
            return Err(Error::invalid_state(format!(
                "provider '{}' is already registered",
                name
            )));
        }
        for dependency in &config.dependencies {
            if dependency.required && !state.entries.contains_key(&dependency.name) {
                return Err(Error::unresolved(name, &dependency.name));
            }
        }
        Ok(())
    }

    /// Force-stop, detach and discard an instance
    ///
    /// A lifecycle verb already running on the instance (for example a slow
    /// start) is awaited to its terminal state first. Dependents are not
    /// consulted; their edges to this instance are removed.
    pub async fn unregister_provider(&self, name: &str) -> Result<()> {
        let (provider, lifecycle) = self.handle(name).await?;
        let _guard = lifecycle.lock().await;

        let status = self.state.read().await.entry(name)?.info.status;
        if status != ProviderStatus::Stopped {
            let timeout = self.config.lifecycle_timeout();
            match tokio::time::timeout(timeout, provider.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Provider {} failed to stop during unregister: {}", name, e),
                Err(_) => warn!(
                    "Provider {} did not stop within {}ms during unregister",
                    name,
                    timeout.as_millis()
                ),
            }
        }

        let mut drafts = Vec::new();
        {
            let mut state = self.state.write().await;
            let entry = state.entries.remove(name).ok_or_else(|| missing(name))?;
            state.graph.remove_node(name);

            let category = entry.info.category;
            if state.defaults.get(&category).is_some_and(|d| d == name) {
                state.defaults.remove(&category);
                let replacement = state
                    .entries
                    .iter()
                    .find(|(_, other)| other.info.category == category)
                    .map(|(other, _)| other.clone());
                if let Some(replacement) = replacement {
                    state.defaults.insert(category.clone(), replacement.clone());
                    drafts.push(
                        EventDraft::info(EventType::DefaultProviderChanged, replacement)
                            .with_payload(json!({ "category": category, "previous": name })),
                    );
                }
            }
            state.failover.retain(|_, candidate| candidate.as_str() != name);
        }

        if status != ProviderStatus::Stopped {
            self.emit(EventDraft::info(EventType::ProviderStopped, name));
        }
        info!("Unregistered provider {}", name);
        self.emit(EventDraft::info(EventType::ProviderUnregistered, name));
        self.emit_all(drafts);
        Ok(())
    }

    /// Register every instance a configuration source lists
    ///
    /// Instances whose required dependency appears later in the listing are
    /// retried until no more progress is made. Already registered names are
    /// reported in `already`.
    pub async fn register_from_source(&self, source: &dyn ConfigSource) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut pending = Vec::new();

        for (name, provider_type) in source.list_providers().await? {
            if self.contains(&name).await {
                report.already.push(name);
                continue;
            }
            match source.get_provider_config(&provider_type, &name).await? {
                Some(config) => pending.push((name, provider_type, config)),
                None => warn!(
                    "Configuration source {} listed {} but returned no configuration",
                    source.source_name(),
                    name
                ),
            }
        }

        loop {
            let before = pending.len();
            let mut unresolved = Vec::new();

            for (name, provider_type, config) in pending {
                match self
                    .register_provider(name.clone(), &provider_type, config.clone())
                    .await
                {
                    Ok(_) => report.succeeded.push(name),
                    Err(e) if e.kind() == ErrorKind::UnresolvedDependency => {
                        unresolved.push((name, provider_type, config))
                    }
                    Err(e) => {
                        warn!("Failed to register {} from {}: {}", name, source.source_name(), e);
                        report.fail(&name, &e);
                    }
                }
            }

            if unresolved.is_empty() || unresolved.len() == before {
                for (name, provider_type, config) in unresolved {
                    if let Err(e) = self.register_provider(name.clone(), &provider_type, config).await {
                        warn!("Failed to register {} from {}: {}", name, source.source_name(), e);
                        report.fail(&name, &e);
                    }
                }
                break;
            }
            pending = unresolved;
        }

        Ok(report)
    }

    /// Reload a source, apply changed settings and register new instances
    pub async fn reload_from_source(&self, source: &dyn ConfigSource) -> Result<BatchReport> {
        source.reload_config().await?;

        let mut report = BatchReport::default();
        for (name, provider_type) in source.list_providers().await? {
            let current = {
                let state = self.state.read().await;
                state
                    .entries
                    .get(&name)
                    .map(|entry| (entry.info.provider_type.clone(), entry.info.config.settings.clone()))
            };
            let Some((registered_type, settings)) = current else {
                continue;
            };
            if registered_type != provider_type {
                warn!(
                    "Provider {} changed type from {} to {} in {}; re-register it to apply",
                    name,
                    registered_type,
                    provider_type,
                    source.source_name()
                );
                report.skipped.push(name);
                continue;
            }
            let Some(config) = source.get_provider_config(&provider_type, &name).await? else {
                continue;
            };
            if config.settings == settings {
                report.already.push(name);
                continue;
            }
            match self.update_provider_config(&name, config.settings).await {
                Ok(()) => report.succeeded.push(name),
                Err(e) => report.fail(&name, &e),
            }
        }

        let registered = self.register_from_source(source).await?;
        report.succeeded.extend(registered.succeeded);
        report.failed.extend(registered.failed);

        Ok(report)
    }

    // ---------------------------------------------------------------------
    // Lookup and query
    // ---------------------------------------------------------------------

    async fn handle(&self, name: &str) -> Result<(Arc<dyn Provider>, Arc<Mutex<()>>)> {
        let state = self.state.read().await;
        let entry = state.entry(name)?;
        Ok((Arc::clone(&entry.provider), Arc::clone(&entry.lifecycle)))
    }

    pub(crate) async fn provider_handle(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.handle(name).await.map(|(provider, _)| provider)
    }

    /// Get a provider instance by logical name
    pub async fn get_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.provider_handle(name).await.ok()
    }

    /// Whether `name` is registered
    pub async fn contains(&self, name: &str) -> bool {
        self.state.read().await.entries.contains_key(name)
    }

    /// Snapshot of one instance
    pub async fn provider_info(&self, name: &str) -> Result<ProviderInfo> {
        let state = self.state.read().await;
        let entry = state.entry(name)?;
        Ok(state.snapshot(name, entry))
    }

    /// Lifecycle status of one instance
    pub async fn status(&self, name: &str) -> Result<ProviderStatus> {
        Ok(self.state.read().await.entry(name)?.info.status)
    }

    async fn snapshots(&self) -> Vec<ProviderInfo> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .map(|(name, entry)| state.snapshot(name, entry))
            .collect()
    }

    /// All instances, optionally restricted to one provider type
    pub async fn list_providers(&self, provider_type: Option<&str>) -> Vec<ProviderInfo> {
        self.snapshots()
            .await
            .into_iter()
            .filter(|info| provider_type.is_none_or(|t| info.provider_type == t))
            .collect()
    }

    /// Instances matching every field set on `query`
    pub async fn find_providers(&self, query: &ProviderQuery) -> Vec<ProviderInfo> {
        self.snapshots()
            .await
            .into_iter()
            .filter(|info| query.matches(info))
            .collect()
    }

    /// Case-insensitive substring search across name, type, category,
    /// description, capabilities and tags
    pub async fn search_providers(&self, term: &str) -> Vec<ProviderInfo> {
        self.snapshots()
            .await
            .into_iter()
            .filter(|info| info.matches_term(term))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Dependencies
    // ---------------------------------------------------------------------

    /// Link `from -> to` after registration
    ///
    /// A required edge needs `to` to be registered. An edge that would close
    /// a cycle fails with `CircularDependency` and leaves the graph unchanged.
    pub async fn add_dependency(&self, from: &str, to: &str, required: bool) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.entry(from)?;
            if required && !state.entries.contains_key(to) {
                return Err(Error::unresolved(from, to));
            }
            state.graph.add_edge(from, to, required)?;
        }

        debug!("Linked dependency {} -> {} (required: {})", from, to, required);
        self.emit(
            EventDraft::info(EventType::DependencyAdded, from)
                .with_payload(json!({ "dependency": to, "required": required })),
        );
        Ok(())
    }

    /// Remove `from -> to`; returns whether the edge existed
    pub async fn remove_dependency(&self, from: &str, to: &str) -> Result<bool> {
        let removed = {
            let mut state = self.state.write().await;
            state.entry(from)?;
            state.graph.remove_edge(from, to)
        };

        if removed {
            self.emit(
                EventDraft::info(EventType::DependencyRemoved, from)
                    .with_payload(json!({ "dependency": to })),
            );
        }
        Ok(removed)
    }

    /// Outgoing dependency edges of `name`
    pub async fn dependencies_of(&self, name: &str) -> Result<Vec<DependencyEdge>> {
        let state = self.state.read().await;
        state.entry(name)?;
        Ok(state.graph.dependencies_of(name).to_vec())
    }

    /// Instances that depend on `name`
    pub async fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        state.entry(name)?;
        Ok(state.graph.dependents_of(name))
    }

    /// Topological order over all instances, recomputed on every call
    pub async fn startup_order(&self) -> Result<Vec<String>> {
        self.state.read().await.graph.topological_order()
    }

    /// Exact reverse of [`startup_order`](Self::startup_order)
    pub async fn shutdown_order(&self) -> Result<Vec<String>> {
        let mut order = self.startup_order().await?;
        order.reverse();
        Ok(order)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    fn timeout_for(&self, options: &LifecycleOptions) -> Duration {
        options
            .timeout
            .unwrap_or_else(|| self.config.lifecycle_timeout())
    }

    async fn run_with_timeout<F>(
        &self,
        name: &str,
        operation: &str,
        timeout: Duration,
        call: F,
    ) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(|e| lifecycle_error(name, e)),
            Err(_) => Err(Error::StartupTimeout {
                provider: name.to_string(),
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn set_status(&self, name: &str, status: ProviderStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        entry.info.status = status;
        match status {
            ProviderStatus::Active => entry.info.started_at = Some(Utc::now()),
            ProviderStatus::Stopped | ProviderStatus::Failed => entry.info.started_at = None,
            _ => {}
        }
        Ok(())
    }

    /// Mark an instance failed after a lifecycle error
    async fn record_failure(&self, name: &str, error: &Error) {
        let mut drafts = Vec::new();
        {
            let mut state = self.state.write().await;
            let Ok(entry) = state.entry_mut(name) else {
                return;
            };
            entry.info.status = ProviderStatus::Failed;
            entry.info.started_at = None;
            entry.info.error_count += 1;
            if let Some(draft) =
                Self::transition_health(entry, name, HealthStatus::Unhealthy, Some(error.to_string()))
            {
                drafts.push(draft);
            }
        }

        warn!("Provider {} failed: {}", name, error);
        self.emit(EventDraft::error(EventType::ProviderFailed, name, error.to_string()));
        self.emit_all(drafts);
    }

    async fn start_instance(&self, name: &str, timeout: Duration) -> Result<Outcome> {
        let (provider, lifecycle) = self.handle(name).await?;
        let _guard = lifecycle.lock().await;

        if self.status(name).await?.is_running() {
            return Ok(Outcome::Already);
        }

        self.set_status(name, ProviderStatus::Starting).await?;
        self.emit(EventDraft::info(EventType::ProviderStarting, name));
        debug!("Starting provider {}", name);

        match self.run_with_timeout(name, "start", timeout, provider.start()).await {
            Ok(()) => {
                self.set_status(name, ProviderStatus::Active).await?;
                info!("Provider {} started", name);
                self.emit(EventDraft::info(EventType::ProviderStarted, name));
                Ok(Outcome::Done)
            }
            Err(e) => {
                self.record_failure(name, &e).await;
                Err(e)
            }
        }
    }

    async fn start_with_retries(&self, name: &str, timeout: Duration, retries: u32) -> Result<Outcome> {
        let mut attempt = 0;
        loop {
            match self.start_instance(name, timeout).await {
                Err(e) if attempt < retries && e.kind() != ErrorKind::NotFound => {
                    attempt += 1;
                    warn!(
                        "Retrying start of {} (attempt {}/{}): {}",
                        name, attempt, retries, e
                    );
                }
                result => return result,
            }
        }
    }

    async fn stop_instance(&self, name: &str, timeout: Duration) -> Result<Outcome> {
        let (provider, lifecycle) = self.handle(name).await?;
        let _guard = lifecycle.lock().await;

        if self.status(name).await? == ProviderStatus::Stopped {
            return Ok(Outcome::Already);
        }

        debug!("Stopping provider {}", name);
        match self.run_with_timeout(name, "stop", timeout, provider.stop()).await {
            Ok(()) => {
                self.set_status(name, ProviderStatus::Stopped).await?;
                info!("Provider {} stopped", name);
                self.emit(EventDraft::info(EventType::ProviderStopped, name));
                Ok(Outcome::Done)
            }
            Err(e) => {
                self.record_failure(name, &e).await;
                Err(e)
            }
        }
    }

    async fn unready_dependency(&self, name: &str) -> Option<String> {
        self.state.read().await.unready_dependency(name)
    }

    /// Start one instance
    ///
    /// With `dependencies`, registered dependencies that are not running are
    /// started first, in dependency order. Without `force`, the instance is
    /// only started once every required dependency is running.
    pub async fn start_provider(&self, name: &str, options: LifecycleOptions) -> Result<()> {
        let timeout = self.timeout_for(&options);

        if options.dependencies {
            let chain = self.state.read().await.graph.dependency_closure(name)?;
            for dependency in chain {
                if self.status(&dependency).await?.is_running() {
                    continue;
                }
                if let Some(blocker) = self.unready_dependency(&dependency).await {
                    debug!("Not starting {}: {} is not running", dependency, blocker);
                    continue;
                }
                if let Err(e) = self
                    .start_with_retries(&dependency, timeout, options.retries)
                    .await
                {
                    warn!("Dependency {} of {} failed to start: {}", dependency, name, e);
                }
            }
        }

        if let Some(dependency) = self.unready_dependency(name).await {
            if !options.force {
                return Err(Error::unresolved(name, dependency));
            }
            warn!("Force-starting {} without dependency {}", name, dependency);
        }

        self.start_with_retries(name, timeout, options.retries)
            .await
            .map(|_| ())
    }

    /// Stop one instance
    ///
    /// With `dependencies`, running dependents are stopped first. Otherwise
    /// a non-forced stop refuses while a dependent is still running.
    pub async fn stop_provider(&self, name: &str, options: LifecycleOptions) -> Result<()> {
        let timeout = self.timeout_for(&options);

        if options.dependencies {
            let chain = self.state.read().await.graph.dependent_closure(name)?;
            for dependent in chain {
                if let Err(e) = self.stop_instance(&dependent, timeout).await {
                    if !options.force {
                        return Err(e);
                    }
                    warn!("Dependent {} of {} failed to stop: {}", dependent, name, e);
                }
            }
        } else if !options.force {
            let state = self.state.read().await;
            state.entry(name)?;
            let running = state
                .graph
                .dependents_of(name)
                .into_iter()
                .find(|dependent| {
                    state
                        .entries
                        .get(dependent)
                        .is_some_and(|entry| entry.info.status.is_running())
                });
            if let Some(dependent) = running {
                return Err(Error::invalid_state(format!(
                    "cannot stop '{}': dependent '{}' is running",
                    name, dependent
                )));
            }
        }

        self.stop_instance(name, timeout).await.map(|_| ())
    }

    /// Restart one instance
    ///
    /// The instance reports `starting` for the whole stop-then-start
    /// sequence and the instance lock is held throughout.
    pub async fn restart_provider(&self, name: &str, options: LifecycleOptions) -> Result<()> {
        let timeout = self.timeout_for(&options);
        let (provider, lifecycle) = self.handle(name).await?;
        let _guard = lifecycle.lock().await;

        self.set_status(name, ProviderStatus::Starting).await?;
        self.emit(EventDraft::info(EventType::ProviderStarting, name));

        match self
            .run_with_timeout(name, "restart", timeout, provider.restart())
            .await
        {
            Ok(()) => {
                self.set_status(name, ProviderStatus::Active).await?;
                info!("Provider {} restarted", name);
                self.emit(EventDraft::info(EventType::ProviderRestarted, name));
                Ok(())
            }
            Err(e) => {
                self.record_failure(name, &e).await;
                Err(e)
            }
        }
    }

    /// Start every instance in startup order
    ///
    /// A failed start aborts the batch with that error unless `force` is
    /// set; with `force`, instances whose required dependency is not running
    /// are skipped and the batch continues.
    pub async fn start_all_providers(&self, options: LifecycleOptions) -> Result<BatchReport> {
        let timeout = self.timeout_for(&options);
        let order = self.startup_order().await?;
        let mut report = BatchReport::default();

        info!("Starting {} provider(s)", order.len());
        for name in order {
            if self.status(&name).await?.is_running() {
                report.already.push(name);
                continue;
            }

            if let Some(dependency) = self.unready_dependency(&name).await {
                if !options.force {
                    return Err(Error::unresolved(&name, dependency));
                }
                warn!("Skipping {}: required dependency {} is not running", name, dependency);
                report.skipped.push(name);
                continue;
            }

            match self.start_with_retries(&name, timeout, options.retries).await {
                Ok(Outcome::Done) => report.succeeded.push(name),
                Ok(Outcome::Already) => report.already.push(name),
                Err(e) => {
                    if !options.force {
                        return Err(e);
                    }
                    report.fail(&name, &e);
                }
            }
        }

        Ok(report)
    }

    /// Stop every instance in shutdown order
    pub async fn stop_all_providers(&self, options: LifecycleOptions) -> Result<BatchReport> {
        let timeout = self.timeout_for(&options);
        let order = self.shutdown_order().await?;
        let mut report = BatchReport::default();

        info!("Stopping {} provider(s)", order.len());
        for name in order {
            match self.stop_instance(&name, timeout).await {
                Ok(Outcome::Done) => report.succeeded.push(name),
                Ok(Outcome::Already) => report.already.push(name),
                Err(e) => {
                    if !options.force {
                        return Err(e);
                    }
                    report.fail(&name, &e);
                }
            }
        }

        Ok(report)
    }

    /// Stop everything in shutdown order, then start everything in startup
    /// order; returns the start report
    pub async fn restart_all_providers(&self, options: LifecycleOptions) -> Result<BatchReport> {
        self.stop_all_providers(options.clone()).await?;
        self.start_all_providers(options).await
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Dry-run new settings through the factory and the instance
    pub async fn validate_provider_config(
        &self,
        name: &str,
        settings: &serde_json::Value,
    ) -> Result<()> {
        let (provider, provider_type, mut config) = {
            let state = self.state.read().await;
            let entry = state.entry(name)?;
            (
                Arc::clone(&entry.provider),
                entry.info.provider_type.clone(),
                entry.info.config.clone(),
            )
        };
        config.settings = settings.clone();
        self.factories.validate(&provider_type, &config)?;
        provider.validate_config(settings).await
    }

    /// Validate then apply new settings to a registered instance
    pub async fn update_provider_config(&self, name: &str, settings: serde_json::Value) -> Result<()> {
        let (provider, lifecycle) = self.handle(name).await?;
        let _guard = lifecycle.lock().await;

        self.validate_provider_config(name, &settings).await?;
        provider.update_config(&settings).await?;

        {
            let mut state = self.state.write().await;
            state.entry_mut(name)?.info.config.settings = settings;
        }

        info!("Updated configuration of {}", name);
        self.emit(EventDraft::info(EventType::ConfigUpdated, name));
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Category defaults and failover
    // ---------------------------------------------------------------------

    /// Default instance of a category
    pub async fn default_provider(&self, category: &str) -> Option<String> {
        self.state.read().await.defaults.get(category).cloned()
    }

    /// Healthy alternative recorded by auto-failover, if any
    pub async fn failover_candidate(&self, category: &str) -> Option<String> {
        self.state.read().await.failover.get(category).cloned()
    }

    /// Point a category's default at `name`
    ///
    /// References already handed out are not touched.
    pub async fn switch_default(&self, category: &str, name: &str) -> Result<()> {
        let previous = {
            let mut state = self.state.write().await;
            let entry_category = state.entry(name)?.info.category.clone();
            if entry_category != category {
                return Err(Error::invalid_state(format!(
                    "provider '{}' belongs to category '{}', not '{}'",
                    name, entry_category, category
                )));
            }
            if state.failover.get(category).is_some_and(|c| c == name) {
                state.failover.remove(category);
            }
            state.defaults.insert(category.to_string(), name.to_string())
        };

        if previous.as_deref() == Some(name) {
            return Ok(());
        }

        info!(
            "Default {} provider switched from {} to {}",
            category,
            previous.as_deref().unwrap_or("<none>"),
            name
        );
        self.emit(
            EventDraft::info(EventType::DefaultProviderChanged, name)
                .with_payload(json!({ "category": category, "previous": previous })),
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Health and metrics
    // ---------------------------------------------------------------------

    /// Apply a health reading to an entry; returns the event for a transition
    fn transition_health(
        entry: &mut ProviderEntry,
        name: &str,
        health: HealthStatus,
        message: Option<String>,
    ) -> Option<EventDraft> {
        let previous = entry.info.health;
        match (entry.info.status, health) {
            (ProviderStatus::Active, HealthStatus::Degraded | HealthStatus::Unhealthy) => {
                entry.info.status = ProviderStatus::Degraded
            }
            (ProviderStatus::Degraded, HealthStatus::Healthy) => {
                entry.info.status = ProviderStatus::Active
            }
            _ => {}
        }

        if previous == health {
            return None;
        }
        entry.info.health = health;

        let payload = json!({
            "previous": previous,
            "current": health,
            "message": message,
        });
        let draft = if health == HealthStatus::Unhealthy {
            EventDraft::warning(EventType::HealthChanged, name)
        } else {
            EventDraft::info(EventType::HealthChanged, name)
        };
        Some(draft.with_payload(payload))
    }

    async fn apply_health(&self, name: &str, health: HealthStatus, message: Option<String>, failed: bool) {
        let mut drafts = Vec::new();
        {
            let mut state = self.state.write().await;
            let Ok(entry) = state.entry_mut(name) else {
                return;
            };
            entry.info.last_health_check = Some(Utc::now());
            if failed {
                entry.info.warning_count += 1;
            }
            let category = entry.info.category.clone();
            let Some(draft) = Self::transition_health(entry, name, health, message) else {
                return;
            };
            drafts.push(draft);

            if health == HealthStatus::Unhealthy && self.config.auto_failover {
                if let Some(candidate) = state.healthy_alternative(&category, name) {
                    state.failover.insert(category.clone(), candidate.clone());
                    drafts.push(
                        EventDraft::warning(EventType::FailoverCandidate, name).with_payload(
                            json!({ "category": category, "candidate": candidate }),
                        ),
                    );
                }
            }
        }

        if health == HealthStatus::Unhealthy {
            warn!("Provider {} is unhealthy", name);
        }
        self.emit_all(drafts);
    }

    /// Probe one instance and record the result
    ///
    /// A probe error or timeout records the instance as unhealthy and
    /// returns `HealthCheckFailure`.
    pub async fn check_provider_health(&self, name: &str) -> Result<DetailedHealth> {
        let provider = self.provider_handle(name).await?;
        let timeout = self.config.health_check_timeout();

        let outcome = match tokio::time::timeout(timeout, provider.detailed_health()).await {
            Ok(Ok(health)) => Ok(health),
            Ok(Err(e)) => Err(Error::health(name, e.to_string())),
            Err(_) => Err(Error::health(
                name,
                format!("no response within {}ms", timeout.as_millis()),
            )),
        };

        match outcome {
            Ok(health) => {
                self.apply_health(name, health.health, health.message.clone(), false)
                    .await;
                Ok(health)
            }
            Err(e) => {
                self.apply_health(name, HealthStatus::Unhealthy, Some(e.to_string()), true)
                    .await;
                Err(e)
            }
        }
    }

    async fn names(&self) -> Vec<String> {
        self.state.read().await.entries.keys().cloned().collect()
    }

    /// Probe every instance concurrently
    ///
    /// Individual failures are recorded as unhealthy and never abort the
    /// sweep.
    pub async fn check_all_health(&self) -> BTreeMap<String, HealthStatus> {
        let names = self.names().await;
        let probes = names.iter().map(|name| async move {
            let health = match self.check_provider_health(name).await {
                Ok(health) => health.health,
                Err(e) => {
                    debug!("Health sweep: {}", e);
                    HealthStatus::Unhealthy
                }
            };
            (name.clone(), health)
        });

        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Collect a metrics snapshot from one instance into its history
    pub async fn provider_metrics(&self, name: &str) -> Result<ProviderMetrics> {
        let provider = self.provider_handle(name).await?;
        let timeout = self.config.health_check_timeout();

        let result = match tokio::time::timeout(timeout, provider.metrics()).await {
            Ok(result) => result.map_err(|e| lifecycle_error(name, e)),
            Err(_) => Err(Error::provider(
                name,
                format!("metrics not returned within {}ms", timeout.as_millis()),
            )),
        };

        let mut state = self.state.write().await;
        let entry = state.entry_mut(name)?;
        match result {
            Ok(metrics) => {
                while entry.metrics_history.len() >= self.config.metrics_history_capacity
                    && entry.metrics_history.pop_front().is_some()
                {}
                entry.metrics_history.push_back(MetricsSnapshot {
                    timestamp: Utc::now(),
                    metrics: metrics.clone(),
                });
                Ok(metrics)
            }
            Err(e) => {
                entry.info.warning_count += 1;
                Err(e)
            }
        }
    }

    /// Collect metrics from every instance concurrently
    ///
    /// Instances whose collection fails are left out.
    pub async fn collect_all_metrics(&self) -> BTreeMap<String, ProviderMetrics> {
        let names = self.names().await;
        let collections = names
            .iter()
            .map(|name| async move { (name.clone(), self.provider_metrics(name).await) });

        futures::future::join_all(collections)
            .await
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(metrics) => Some((name, metrics)),
                Err(e) => {
                    debug!("Metrics sweep: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Rolling history of one instance, oldest first
    pub async fn metrics_history(&self, name: &str) -> Result<Vec<MetricsSnapshot>> {
        let state = self.state.read().await;
        Ok(state.entry(name)?.metrics_history.iter().cloned().collect())
    }

    /// Most recent snapshot without calling the provider
    pub async fn latest_metrics(&self, name: &str) -> Result<Option<ProviderMetrics>> {
        let state = self.state.read().await;
        Ok(state
            .entry(name)?
            .metrics_history
            .back()
            .map(|snapshot| snapshot.metrics.clone()))
    }

    /// Aggregate report over the latest snapshot of every instance
    pub async fn aggregate_metrics(&self) -> AggregateMetrics {
        let latest: Vec<(String, ProviderMetrics)> = {
            let state = self.state.read().await;
            state
                .entries
                .iter()
                .filter_map(|(name, entry)| {
                    entry
                        .metrics_history
                        .back()
                        .map(|snapshot| (name.clone(), snapshot.metrics.clone()))
                })
                .collect()
        };

        let mut report = AggregateMetrics {
            providers: latest.len(),
            ..AggregateMetrics::default()
        };

        let mut weighted_latency = 0.0;
        for (_, metrics) in &latest {
            report.total_requests += metrics.requests_total;
            report.failed_requests += metrics.requests_failed.min(metrics.requests_total);
            weighted_latency += metrics.avg_response_ms * metrics.requests_total as f64;
        }

        if report.total_requests > 0 {
            report.error_rate = report.failed_requests as f64 / report.total_requests as f64;
            report.success_rate = 1.0 - report.error_rate;
            report.avg_response_ms = weighted_latency / report.total_requests as f64;
        } else {
            report.success_rate = 1.0;
        }

        let lines: Vec<ProviderPerformance> = latest
            .into_iter()
            .map(|(name, metrics)| ProviderPerformance {
                name,
                requests_total: metrics.requests_total,
                success_rate: metrics.success_rate(),
                avg_response_ms: metrics.avg_response_ms,
            })
            .collect();

        let mut performers = lines.clone();
        performers.sort_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then(a.avg_response_ms.total_cmp(&b.avg_response_ms))
        });
        performers.truncate(TOP_PERFORMERS);
        report.top_performers = performers;

        let mut bottlenecks: Vec<_> = lines
            .into_iter()
            .filter(|line| line.avg_response_ms > self.config.bottleneck_threshold_ms)
            .collect();
        bottlenecks.sort_by(|a, b| b.avg_response_ms.total_cmp(&a.avg_response_ms));
        report.bottlenecks = bottlenecks;

        report
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Deliver every event to `callback`
    pub fn subscribe_to_events<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(None, Arc::new(callback))
    }

    /// Deliver events of one type to `callback`
    pub fn subscribe_to<F>(&self, event_type: EventType, callback: F) -> Subscription
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(Some(event_type), Arc::new(callback))
    }

    /// Most recent events, oldest first
    pub fn event_history(&self, limit: Option<usize>) -> Vec<ProviderEvent> {
        self.events.history(limit)
    }

    /// Retained events about one instance, oldest first
    pub fn events_for(&self, provider_id: &str) -> Vec<ProviderEvent> {
        self.events.history_for(provider_id)
    }

    /// Async stream of events emitted after the call
    pub fn event_stream(&self) -> impl Stream<Item = ProviderEvent> + Send + 'static {
        self.events.stream()
    }

    // ---------------------------------------------------------------------
    // Backup and capability pass-through
    // ---------------------------------------------------------------------

    /// Snapshot an instance's data through its setup automation
    pub async fn backup_provider(&self, name: &str) -> Result<String> {
        let provider = self.provider_handle(name).await?;
        let setup = provider
            .setup_automation()
            .ok_or_else(|| Error::unsupported(name, "setup_automation"))?;
        let backup_id = setup.create_backup().await?;

        info!("Created backup {} of {}", backup_id, name);
        self.emit(
            EventDraft::info(EventType::BackupCreated, name)
                .with_payload(json!({ "backup_id": backup_id })),
        );
        Ok(backup_id)
    }

    /// Replace an instance's data with a previous backup
    pub async fn restore_provider(&self, name: &str, backup_id: &str) -> Result<()> {
        let provider = self.provider_handle(name).await?;
        let setup = provider
            .setup_automation()
            .ok_or_else(|| Error::unsupported(name, "setup_automation"))?;
        setup.restore_backup(backup_id).await?;

        info!("Restored {} from backup {}", name, backup_id);
        self.emit(
            EventDraft::warning(EventType::BackupRestored, name)
                .with_payload(json!({ "backup_id": backup_id })),
        );
        Ok(())
    }

    /// Run the instance's diagnostic checks
    pub async fn run_diagnostics(&self, name: &str) -> Result<Vec<DiagnosticResult>> {
        self.provider_handle(name).await?.run_diagnostics().await
    }

    /// Free-form debug dump of an instance
    pub async fn debug_info(&self, name: &str) -> Result<serde_json::Value> {
        Ok(self.provider_handle(name).await?.debug_info())
    }

    /// Sub-services of a multi-service instance
    pub async fn provider_services(&self, name: &str) -> Result<Vec<ServiceDescriptor>> {
        let provider = self.provider_handle(name).await?;
        let services = provider
            .multi_service()
            .ok_or_else(|| Error::unsupported(name, "multi_service"))?;
        Ok(services.available_services())
    }

    /// Enable one sub-service
    pub async fn enable_service(&self, name: &str, service: &str) -> Result<()> {
        let provider = self.provider_handle(name).await?;
        let services = provider
            .multi_service()
            .ok_or_else(|| Error::unsupported(name, "multi_service"))?;
        services.enable_service(service).await
    }

    /// Disable one sub-service
    pub async fn disable_service(&self, name: &str, service: &str) -> Result<()> {
        let provider = self.provider_handle(name).await?;
        let services = provider
            .multi_service()
            .ok_or_else(|| Error::unsupported(name, "multi_service"))?;
        services.disable_service(service).await
    }

    /// Wizard steps of an instance, falling back to its factory's steps
    pub async fn wizard_steps(&self, name: &str) -> Result<Vec<WizardStep>> {
        let (provider, provider_type) = {
            let state = self.state.read().await;
            let entry = state.entry(name)?;
            (Arc::clone(&entry.provider), entry.info.provider_type.clone())
        };
        match provider.wizard() {
            Some(wizard) => Ok(wizard.wizard_steps()),
            None => Ok(self.factories.get(&provider_type)?.wizard_steps()),
        }
    }

    /// Validate wizard input without applying it
    pub async fn validate_wizard_step(
        &self,
        name: &str,
        step_id: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let provider = self.provider_handle(name).await?;
        let wizard = provider
            .wizard()
            .ok_or_else(|| Error::unsupported(name, "wizard"))?;
        wizard.validate_step(step_id, data)
    }

    /// Validate then apply one wizard step
    pub async fn execute_wizard_step(
        &self,
        name: &str,
        step_id: &str,
        data: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let provider = self.provider_handle(name).await?;
        let wizard = provider
            .wizard()
            .ok_or_else(|| Error::unsupported(name, "wizard"))?;
        wizard.validate_step(step_id, data)?;
        wizard.execute_step(step_id, data).await
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("factories", &self.factories)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Read-only views over registered providers
//!
//! Queries operate on [`ProviderInfo`] snapshots copied out of the registry,
//! so filtering never holds the registry lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::config::{DependencySpec, ProviderConfig};
use crate::traits::{HealthStatus, ProviderFamily, ProviderStatus};

/// Snapshot of one registered provider instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub provider_type: String,
    pub category: String,
    pub family: ProviderFamily,
    pub description: String,
    pub capabilities: Vec<String>,
    pub tags: Vec<String>,
    pub status: ProviderStatus,
    pub health: HealthStatus,
    /// Configuration as last applied
    pub config: ProviderConfig,
    /// Declared dependency edges
    pub dependencies: Vec<DependencySpec>,
    pub multi_service: bool,
    pub auto_setup: bool,
    pub registered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub warning_count: u64,
}

impl ProviderInfo {
    /// Time since the last successful start, when running
    pub fn uptime(&self) -> Option<Duration> {
        if !self.status.is_running() {
            return None;
        }
        self.started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Case-insensitive substring match across the searchable fields
    pub(crate) fn matches_term(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        let contains = |value: &str| value.to_lowercase().contains(&term);

        contains(&self.name)
            || contains(&self.provider_type)
            || contains(&self.category)
            || contains(&self.description)
            || self.capabilities.iter().any(|c| contains(c))
            || self.tags.iter().any(|t| contains(t))
    }
}

/// Filter for `find_providers`
///
/// Every set field must match; an empty query matches everything.
///
/// ```rust
/// use switchyard_core::registry::ProviderQuery;
/// use switchyard_core::traits::ProviderStatus;
///
/// let query = ProviderQuery::new()
///     .category("database")
///     .status(ProviderStatus::Active)
///     .capability("transactions");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderQuery {
    pub provider_type: Option<String>,
    pub category: Option<String>,
    pub status: Option<ProviderStatus>,
    pub health: Option<HealthStatus>,
    pub capability: Option<String>,
    pub tag: Option<String>,
    pub multi_service: Option<bool>,
    pub auto_setup: Option<bool>,
}

impl ProviderQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = Some(provider_type.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn status(mut self, status: ProviderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn health(mut self, health: HealthStatus) -> Self {
        self.health = Some(health);
        self
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn multi_service(mut self, multi_service: bool) -> Self {
        self.multi_service = Some(multi_service);
        self
    }

    pub fn auto_setup(mut self, auto_setup: bool) -> Self {
        self.auto_setup = Some(auto_setup);
        self
    }

    pub fn matches(&self, info: &ProviderInfo) -> bool {
        self.provider_type
            .as_deref()
            .is_none_or(|t| info.provider_type == t)
            && self.category.as_deref().is_none_or(|c| info.category == c)
            && self.status.is_none_or(|s| info.status == s)
            && self.health.is_none_or(|h| info.health == h)
            && self
                .capability
                .as_deref()
                .is_none_or(|c| info.has_capability(c))
            && self
                .tag
                .as_deref()
                .is_none_or(|t| info.tags.iter().any(|tag| tag == t))
            && self.multi_service.is_none_or(|m| info.multi_service == m)
            && self.auto_setup.is_none_or(|a| info.auto_setup == a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, category: &str) -> ProviderInfo {
        ProviderInfo {
            name: name.to_string(),
            provider_type: "memory-sql".to_string(),
            category: category.to_string(),
            family: ProviderFamily::Relational,
            description: "In-memory SQL store".to_string(),
            capabilities: vec!["transactions".to_string()],
            tags: vec!["primary".to_string()],
            status: ProviderStatus::Active,
            health: HealthStatus::Healthy,
            config: ProviderConfig::default(),
            dependencies: Vec::new(),
            multi_service: false,
            auto_setup: true,
            registered_at: Utc::now(),
            started_at: Some(Utc::now()),
            last_health_check: None,
            error_count: 0,
            warning_count: 0,
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(ProviderQuery::new().matches(&info("db", "database")));
    }

    #[test]
    fn all_set_fields_must_match() {
        let db = info("db", "database");
        let query = ProviderQuery::new()
            .category("database")
            .capability("transactions")
            .auto_setup(true);
        assert!(query.matches(&db));

        assert!(!query.clone().status(ProviderStatus::Stopped).matches(&db));
        assert!(!query.clone().tag("archive").matches(&db));
        assert!(!query.multi_service(true).matches(&db));
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let db = info("orders-db", "database");
        assert!(db.matches_term("ORDERS"));
        assert!(db.matches_term("sql"));
        assert!(db.matches_term("transact"));
        assert!(db.matches_term("prim"));
        assert!(!db.matches_term("auth"));
    }

    #[test]
    fn uptime_only_while_running() {
        let mut db = info("db", "database");
        assert!(db.uptime().is_some());
        db.status = ProviderStatus::Stopped;
        assert!(db.uptime().is_none());
    }
}

//! Error types for the switchyard registry
//!
//! Every failure surfaced by the registry or the migration engine carries an
//! [`ErrorKind`] so callers can branch on the taxonomy without matching on
//! message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    UnknownProviderType,
    NotFound,
    CircularDependency,
    UnresolvedDependency,
    StartupTimeout,
    ProviderFailure,
    HealthCheckFailure,
    MigrationStepFailure,
    InvalidState,
    CapabilityUnsupported,
    Io,
    Json,
    Other,
}

impl ErrorKind {
    /// Structural and configuration errors block the operation that
    /// triggered them and are never recorded as runtime failures.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigInvalid
                | ErrorKind::UnknownProviderType
                | ErrorKind::CircularDependency
                | ErrorKind::UnresolvedDependency
        )
    }
}

/// Core error type for the registry and migration engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// No factory is registered for the requested provider type
    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    /// Named provider, migration or backup does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Dependency graph would contain a cycle
    #[error("Circular dependency: {}", .path.join(" -> "))]
    CircularDependency {
        /// Provider names along the cycle, first name repeated at the end
        path: Vec<String>,
    },

    /// A required dependency is missing or not active
    #[error("Unresolved dependency: {provider} requires {dependency}")]
    UnresolvedDependency {
        /// Provider declaring the dependency
        provider: String,
        /// Dependency that could not be resolved
        dependency: String,
    },

    /// Lifecycle verb exceeded its deadline
    #[error("Provider {provider} did not finish {operation} within {timeout_ms}ms")]
    StartupTimeout {
        provider: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Provider reported an error during a lifecycle transition or call
    #[error("Provider error ({provider}): {message}")]
    ProviderFailure {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Health probe failed or timed out
    #[error("Health check failed for {provider}: {message}")]
    HealthCheckFailure { provider: String, message: String },

    /// A migration step failed
    #[error("Migration step {step} failed: {message}")]
    MigrationStepFailure { step: String, message: String },

    /// Operation is not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Optional provider capability is not implemented
    #[error("Provider {provider} does not support {capability}")]
    CapabilityUnsupported { provider: String, capability: String },

    /// I/O errors (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration validation error
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Create an unknown provider type error
    pub fn unknown_type(provider_type: impl Into<String>) -> Self {
        Self::UnknownProviderType(provider_type.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an unresolved dependency error
    pub fn unresolved(provider: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnresolvedDependency {
            provider: provider.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderFailure {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a health check error
    pub fn health(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HealthCheckFailure {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a migration step error
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MigrationStepFailure {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a missing capability error
    pub fn unsupported(provider: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::CapabilityUnsupported {
            provider: provider.into(),
            capability: capability.into(),
        }
    }

    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            Error::UnknownProviderType(_) => ErrorKind::UnknownProviderType,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::CircularDependency { .. } => ErrorKind::CircularDependency,
            Error::UnresolvedDependency { .. } => ErrorKind::UnresolvedDependency,
            Error::StartupTimeout { .. } => ErrorKind::StartupTimeout,
            Error::ProviderFailure { .. } => ErrorKind::ProviderFailure,
            Error::HealthCheckFailure { .. } => ErrorKind::HealthCheckFailure,
            Error::MigrationStepFailure { .. } => ErrorKind::MigrationStepFailure,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::CapabilityUnsupported { .. } => ErrorKind::CapabilityUnsupported,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
            Error::Other(_) => ErrorKind::Other,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_dependency_message_lists_path() {
        let err = Error::CircularDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency: a -> b -> a");
        assert_eq!(err.kind(), ErrorKind::CircularDependency);
        assert!(err.kind().is_structural());
    }

    #[test]
    fn runtime_errors_are_not_structural() {
        assert!(!Error::provider("db", "boom").kind().is_structural());
        assert!(!Error::health("db", "slow").kind().is_structural());
    }
}

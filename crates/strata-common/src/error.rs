//! Error types for the Strata operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each error variant includes contextual information like cluster names,
//! engine names, and underlying causes.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Strata operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for DatabaseCluster specs
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.components[0].type")
        field: Option<String>,
    },

    /// Engine provider error
    #[error("provider error [{engine}] for {cluster}: {message}")]
    Provider {
        /// Name of the cluster being reconciled
        cluster: String,
        /// Engine the provider serves (clickhouse, pxc, ...)
        engine: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// A DatabaseClusterDefinition could not be found
    #[error("definition {namespace}/{name} not found for {cluster}")]
    DefinitionNotFound {
        /// Name of the cluster that references the definition
        cluster: String,
        /// Namespace searched
        namespace: String,
        /// Definition name
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A reconcile attempt exceeded its deadline
    #[error("reconcile of {cluster} timed out after {seconds}s")]
    Timeout {
        /// Name of the cluster being reconciled
        cluster: String,
        /// Deadline that was exceeded
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "registry")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable provider error with full context
    pub fn provider_for(
        cluster: impl Into<String>,
        engine: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            cluster: cluster.into(),
            engine: engine.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (e.g., wrong component cardinality)
    pub fn provider_permanent(
        cluster: impl Into<String>,
        engine: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            cluster: cluster.into(),
            engine: engine.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a definition-not-found error
    pub fn definition_not_found(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::DefinitionNotFound {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(cluster: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            cluster: cluster.into(),
            seconds,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (require a spec fix).
    /// Conflicts, timeouts and server errors from Kubernetes are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    ae.code == 404 || ae.code == 409 || ae.code == 429 || ae.code >= 500
                }
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Provider { retryable, .. } => *retryable,
            Error::DefinitionNotFound { .. } => true,
            Error::Serialization { .. } => false,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this error means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Validation { cluster, .. }
            | Error::Provider { cluster, .. }
            | Error::DefinitionNotFound { cluster, .. }
            | Error::Timeout { cluster, .. } => Some(cluster),
            Error::Kube { .. } | Error::Serialization { .. } | Error::Internal { .. } => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    /// Story: a cluster with a bad component list is rejected with a clear message
    #[test]
    fn story_validation_errors_name_the_cluster_and_field() {
        let err = Error::validation_for_field("orders", "spec.components[0].type", "must be set");
        assert!(err.to_string().contains("validation error for orders"));
        assert_eq!(err.cluster(), Some("orders"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.components[0].type"))
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn provider_errors_carry_engine_and_retryability() {
        let err = Error::provider_for("orders", "clickhouse", "apply failed");
        assert!(err.to_string().contains("[clickhouse]"));
        assert!(err.is_retryable());

        let err = Error::provider_permanent("orders", "clickhouse", "two clickhouse components");
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_kube_errors_are_retryable() {
        assert!(api_error(409).is_retryable());
        assert!(api_error(500).is_retryable());
        assert!(api_error(429).is_retryable());
        assert!(!api_error(422).is_retryable());
    }

    #[test]
    fn not_found_detection() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(409).is_not_found());
        assert!(!Error::internal("x").is_not_found());
    }

    #[test]
    fn missing_definition_is_retryable() {
        let err = Error::definition_not_found("orders", "db", "clickhouse-definition");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("db/clickhouse-definition"));
        assert_eq!(err.cluster(), Some("orders"));
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert!(err.to_string().contains("[unknown]"));
        assert_eq!(err.cluster(), None);
    }

    #[test]
    fn timeout_is_retryable() {
        let err = Error::timeout("orders", 60);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("60s"));
    }
}

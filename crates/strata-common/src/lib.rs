//! Common types for Strata: CRDs, errors, credentials and Kubernetes utilities

#![deny(missing_docs)]

pub mod credentials;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use credentials::Credentials;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all Strata CRDs
pub const STRATA_GROUP: &str = "strata.dev";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "strata-controller";

/// Standard managed-by label key
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label on objects Strata creates
pub const LABEL_MANAGED_BY_STRATA: &str = "strata";

/// Label selector matching every object Strata creates
pub const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=strata";

/// Label carrying the owning DatabaseCluster name
pub const LABEL_CLUSTER: &str = "strata.dev/cluster";

/// Annotation that requests a rolling restart of a DatabaseCluster
///
/// Each distinct value is honored once; change the value (e.g. to a timestamp)
/// to request another restart.
pub const RESTART_ANNOTATION: &str = "strata.dev/restart";

/// Finalizer the engine holds until the provider reports teardown complete
pub const CLUSTER_FINALIZER: &str = "strata.dev/provider-cleanup";

//! Generic reconciliation engine for DatabaseCluster resources
//!
//! The engine is engine-agnostic: everything specific to ClickHouse, MySQL and so
//! on sits behind the [`Provider`] trait.
//!
//! Related crates:
//! - `strata-common`: CRDs, errors, credentials
//! - `strata-clickhouse`: ClickHouse provider

pub mod config;
pub mod controller;
pub mod credentials;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod runner;

#[cfg(test)]
mod testing;

pub use config::{EngineConfig, RestartPolicy, RetryPolicy};
pub use controller::{error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl};
pub use provider::{DeleteStatus, ObservedStatus, Provider, WatchSource};
pub use registry::ProviderRegistry;
pub use runner::build_controller;

// Re-export common error types
pub use strata_common::{Error, Result};

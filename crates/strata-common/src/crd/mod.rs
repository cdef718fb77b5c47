//! Custom Resource Definitions for Strata
//!
//! This module contains all CRD definitions used by the Strata operator.

mod cluster;
mod definition;
mod types;

pub use cluster::{
    ComponentResources, ComponentSpec, ComponentStatus, DatabaseCluster, DatabaseClusterSpec,
    DatabaseClusterStatus, LocalRef, Storage,
};
pub use definition::{
    ComponentDefinition, ComponentPodSpec, DatabaseClusterDefinition,
    DatabaseClusterDefinitionSpec,
};
pub use types::{ClusterPhase, Condition, ConditionStatus, EngineKind};

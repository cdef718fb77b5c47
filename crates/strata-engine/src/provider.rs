//! Provider contract
//!
//! A provider is the only seam a new database engine implements. It turns a
//! definition-resolved `DatabaseCluster` into engine-native objects, reports their
//! state back in a common shape, and tears them down on deletion. The engine owns
//! everything else: fetching, secrets, finalizers, status and retries.
//!
//! # Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use strata_engine::provider::{DeleteStatus, ObservedStatus, Provider, WatchSource};
//!
//! struct MyProvider;
//!
//! #[async_trait]
//! impl Provider for MyProvider {
//!     fn engine(&self) -> EngineKind { EngineKind::Pxc }
//!     fn sources(&self) -> Result<Vec<WatchSource>, Error> { Ok(vec![]) }
//!     async fn reconcile(&self, cluster: &DatabaseCluster) -> Result<(), Error> { todo!() }
//!     async fn observe(&self, cluster: &DatabaseCluster) -> Result<ObservedStatus, Error> { todo!() }
//!     async fn handle_delete(&self, cluster: &DatabaseCluster) -> Result<DeleteStatus, Error> { todo!() }
//!     async fn default_credentials(&self, cluster: &DatabaseCluster) -> Result<Credentials, Error> { todo!() }
//! }
//! ```

use async_trait::async_trait;
use kube::discovery::ApiResource;

#[cfg(test)]
use mockall::automock;

use strata_common::crd::{ClusterPhase, ComponentStatus, DatabaseCluster, EngineKind};
use strata_common::{Credentials, Error};

/// A secondary object kind whose changes re-trigger reconciliation of its owner
///
/// Objects are mapped back to their `DatabaseCluster` through the controller
/// owner reference, so providers must set one on everything they create.
#[derive(Clone, Debug)]
pub struct WatchSource {
    /// Kind to watch
    pub api_resource: ApiResource,
    /// Optional label selector narrowing the watch
    pub label_selector: Option<String>,
}

impl WatchSource {
    /// Watch every object of the given kind
    pub fn new(api_resource: ApiResource) -> Self {
        Self {
            api_resource,
            label_selector: None,
        }
    }

    /// Narrow the watch with a label selector
    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }
}

/// Engine state projected into the common status shape
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedStatus {
    /// Lifecycle phase reported by the engine
    pub phase: ClusterPhase,
    /// Client connection endpoint
    pub connection_url: Option<String>,
    /// Per-component status
    pub components: Vec<ComponentStatus>,
    /// Engine-reported message
    pub message: Option<String>,
}

/// Progress of provider teardown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Teardown is still running; poll again
    InProgress,
    /// No provider state remains
    Done,
}

/// Per-engine implementation of the reconciliation contract
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Engine this provider serves
    fn engine(&self) -> EngineKind;

    /// Secondary watch sources
    ///
    /// Called once at startup. Must not block; an error aborts startup.
    fn sources(&self) -> Result<Vec<WatchSource>, Error>;

    /// Apply the engine-native objects for `cluster`
    ///
    /// `cluster` has pod defaults attached. Must be idempotent and must not
    /// assume the objects are absent.
    async fn reconcile(&self, cluster: &DatabaseCluster) -> Result<(), Error>;

    /// Read engine-native state
    ///
    /// A not-found error is treated by the engine as "no status yet".
    async fn observe(&self, cluster: &DatabaseCluster) -> Result<ObservedStatus, Error>;

    /// Tear down provider-managed state
    async fn handle_delete(&self, cluster: &DatabaseCluster) -> Result<DeleteStatus, Error>;

    /// The bootstrap credentials the engine was set up with
    async fn default_credentials(&self, cluster: &DatabaseCluster) -> Result<Credentials, Error>;

    /// Trigger a rolling restart
    ///
    /// Engines without a restart mechanism keep the default no-op.
    async fn restart(&self, _cluster: &DatabaseCluster) -> Result<(), Error> {
        Ok(())
    }
}

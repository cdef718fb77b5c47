//! DatabaseCluster controller implementation
//!
//! One reconcile pass is level-triggered and runs top to bottom: fetch, check
//! engine ownership, then either drive provider teardown or resolve definitions,
//! ensure secrets, call the provider and project its state into status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use strata_common::crd::{
    ClusterPhase, Condition, ConditionStatus, DatabaseCluster, DatabaseClusterDefinition,
    DatabaseClusterStatus, EngineKind,
};
use strata_common::{kube_utils, Error, CLUSTER_FINALIZER, FIELD_MANAGER};

use crate::config::{EngineConfig, RestartPolicy};
use crate::credentials::{ensure_default_secret, reconcile_internal_secret};
use crate::provider::{DeleteStatus, ObservedStatus, Provider};
use crate::resolver::resolve_definitions;

/// Condition type summarizing cluster readiness
pub const READY_CONDITION: &str = "Ready";

/// Trait abstracting Kubernetes client operations for DatabaseCluster
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a DatabaseCluster; `None` when it does not exist
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseCluster>, Error>;

    /// Get a DatabaseClusterDefinition; `None` when it does not exist
    async fn get_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseClusterDefinition>, Error>;

    /// Get a Secret; `None` when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a Secret
    ///
    /// Returns `false` when a secret with that name already exists.
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<bool, Error>;

    /// Replace an existing Secret
    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Write the status of a DatabaseCluster
    ///
    /// The stored status equals `status` afterwards; fields unset in `status`
    /// are cleared.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &DatabaseClusterStatus,
    ) -> Result<(), Error>;

    /// Record the restart marker that was just honored
    async fn record_restart(&self, namespace: &str, name: &str, marker: &str)
        -> Result<(), Error>;

    /// Add a finalizer to a DatabaseCluster
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from a DatabaseCluster
    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn clusters(&self, namespace: &str) -> Api<DatabaseCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.clusters(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseCluster>, Error> {
        Ok(self.clusters(namespace).get_opt(name).await?)
    }

    async fn get_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseClusterDefinition>, Error> {
        let api: Api<DatabaseClusterDefinition> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<bool, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), secret).await {
            Ok(_) => Ok(true),
            Err(e) if kube_utils::is_conflict(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&secret.name_any(), &PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &DatabaseClusterStatus,
    ) -> Result<(), Error> {
        let patch = status
            .merge_patch()
            .map_err(|e| Error::serialization_for_kind("DatabaseCluster", e.to_string()))?;
        kube_utils::patch_resource_status::<DatabaseCluster>(&self.client, name, namespace, &patch)
            .await?;
        Ok(())
    }

    async fn record_restart(
        &self,
        namespace: &str,
        name: &str,
        marker: &str,
    ) -> Result<(), Error> {
        let status = serde_json::json!({ "restartObservedMarker": marker });
        kube_utils::patch_resource_status::<DatabaseCluster>(&self.client, name, namespace, &status)
            .await?;
        Ok(())
    }

    async fn add_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let cluster = self.clusters(namespace).get(name).await?;
        let mut finalizers = cluster.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let cluster = match self.clusters(namespace).get_opt(name).await? {
            Some(cluster) => cluster,
            None => return Ok(()),
        };
        let finalizers: Vec<String> = cluster
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();
        self.patch_finalizers(namespace, name, finalizers).await
    }
}

/// Controller context shared by every reconcile of one engine worker
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Provider for this worker's engine
    pub provider: Arc<dyn Provider>,
    /// Engine this worker owns; clusters for other engines are skipped
    pub engine: EngineKind,
    /// Timeouts, intervals and policies
    pub config: EngineConfig,
    /// Consecutive failures per `namespace/name`
    failures: DashMap<String, u32>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, provider: Arc<dyn Provider>) -> ContextBuilder {
        ContextBuilder::new(client, provider)
    }

    /// Create a context for testing with a custom kube client
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        provider: Arc<dyn Provider>,
        engine: EngineKind,
        config: EngineConfig,
    ) -> Self {
        Self {
            kube,
            provider,
            engine,
            config,
            failures: DashMap::new(),
        }
    }

    /// Current consecutive failure count for a cluster key
    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures.get(key).map(|c| *c).unwrap_or(0)
    }

    fn record_failure(&self, key: &str) -> u32 {
        let mut count = self.failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn clear_failures(&self, key: &str) {
        self.failures.remove(key);
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    provider: Arc<dyn Provider>,
    kube: Option<Arc<dyn KubeClient>>,
    config: EngineConfig,
}

impl ContextBuilder {
    fn new(client: Client, provider: Arc<dyn Provider>) -> Self {
        Self {
            client,
            provider,
            kube: None,
            config: EngineConfig::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Set the engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    ///
    /// The worker's engine is taken from the provider.
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            engine: self.provider.engine(),
            provider: self.provider,
            config: self.config,
            failures: DashMap::new(),
        }
    }
}

fn cluster_key(cluster: &DatabaseCluster) -> String {
    format!(
        "{}/{}",
        cluster.namespace().unwrap_or_default(),
        cluster.name_any()
    )
}

/// Reconcile a DatabaseCluster
///
/// The triggering object only supplies the identity; the cluster is re-fetched
/// before anything is acted on. Each attempt is bounded by
/// `EngineConfig::reconcile_timeout`.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any(), engine = %ctx.engine))]
pub async fn reconcile(cluster: Arc<DatabaseCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = cluster_key(&cluster);
    let timeout = ctx.config.reconcile_timeout;

    let result = match tokio::time::timeout(timeout, reconcile_cluster(&cluster, &ctx)).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(cluster.name_any(), timeout.as_secs())),
    };

    match result {
        Ok(action) => {
            ctx.clear_failures(&key);
            Ok(action)
        }
        Err(e) => {
            let attempts = ctx.record_failure(&key);
            if !e.is_retryable() && attempts >= ctx.config.failure_threshold {
                if let Err(patch_err) = surface_failure(&cluster, &ctx, &e).await {
                    warn!(error = %patch_err, "failed to record failure in status");
                }
            }
            Err(e)
        }
    }
}

async fn reconcile_cluster(trigger: &DatabaseCluster, ctx: &Context) -> Result<Action, Error> {
    let name = trigger.name_any();
    let namespace = trigger.namespace().unwrap_or_default();

    let Some(cluster) = ctx.kube.get_cluster(&namespace, &name).await? else {
        debug!("cluster no longer exists");
        ctx.clear_failures(&cluster_key(trigger));
        return Ok(Action::await_change());
    };

    if cluster.engine_kind() != Some(ctx.engine) {
        debug!(declared = %cluster.spec.engine, "cluster belongs to another engine, skipping");
        return Ok(Action::await_change());
    }

    if cluster.is_deleting() {
        return handle_deletion(&cluster, ctx).await;
    }

    info!("reconciling cluster");
    cluster.validate()?;

    let definition_name = cluster.definition_name();
    let definition = ctx
        .kube
        .get_definition(&namespace, &definition_name)
        .await?
        .ok_or_else(|| Error::definition_not_found(&name, &namespace, &definition_name))?;
    let mut resolved = resolve_definitions(&cluster, &definition)?;

    if !has_finalizer(&cluster) {
        info!("adding provider cleanup finalizer");
        ctx.kube
            .add_finalizer(&namespace, &name, CLUSTER_FINALIZER)
            .await?;
    }

    ensure_default_secret(ctx.kube.as_ref(), &resolved).await?;

    let current = cluster.status.clone().unwrap_or_default();
    let restart_observed_marker = honor_restart(&resolved, &current, ctx).await?;
    // Providers derive restart-sensitive state from the honored marker
    resolved
        .status
        .get_or_insert_with(Default::default)
        .restart_observed_marker = restart_observed_marker.clone();

    ctx.provider.reconcile(&resolved).await?;

    let observed = match ctx.provider.observe(&resolved).await {
        Ok(observed) => observed,
        Err(e) if e.is_not_found() => {
            debug!("engine objects not found yet");
            ObservedStatus::default()
        }
        Err(e) => return Err(e),
    };

    let credential_secret_ref = match ctx.provider.default_credentials(&resolved).await {
        Ok(creds) => Some(reconcile_internal_secret(ctx.kube.as_ref(), &resolved, &creds).await?),
        Err(e) if e.is_not_found() => {
            debug!("default credentials not available yet");
            current.credential_secret_ref.clone()
        }
        Err(e) => return Err(e),
    };

    let phase = observed.phase.clone();
    let next = DatabaseClusterStatus {
        observed_generation: cluster.metadata.generation,
        phase: observed.phase,
        connection_url: observed.connection_url,
        credential_secret_ref,
        components: observed.components,
        message: observed.message,
        conditions: current.conditions.clone(),
        restart_observed_marker,
    }
    .condition(ready_condition(&phase));

    if next != current {
        info!(phase = %next.phase, "updating cluster status");
        ctx.kube.patch_status(&namespace, &name, &next).await?;
    } else {
        debug!("status unchanged");
    }

    Ok(match phase {
        ClusterPhase::Running => Action::requeue(ctx.config.resync_interval),
        _ => Action::requeue(ctx.config.pending_interval),
    })
}

/// Call `Provider::restart` when a new restart marker is present
///
/// Returns the marker value status should carry afterwards.
async fn honor_restart(
    cluster: &DatabaseCluster,
    current: &DatabaseClusterStatus,
    ctx: &Context,
) -> Result<Option<String>, Error> {
    let observed = current.restart_observed_marker.clone();
    if ctx.config.restart_policy == RestartPolicy::Disabled {
        return Ok(observed);
    }
    let Some(marker) = cluster.restart_marker() else {
        return Ok(observed);
    };
    if observed.as_deref() == Some(marker) {
        return Ok(observed);
    }

    info!(marker = %marker, "restart requested");
    ctx.provider.restart(cluster).await?;
    ctx.kube
        .record_restart(
            &cluster.namespace().unwrap_or_default(),
            &cluster.name_any(),
            marker,
        )
        .await?;
    Ok(Some(marker.to_string()))
}

/// Drive provider teardown for a cluster with a deletion timestamp
///
/// Never calls `Provider::reconcile`. Owned objects are left to garbage
/// collection; only the engine finalizer is removed once the provider is done.
async fn handle_deletion(cluster: &DatabaseCluster, ctx: &Context) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    if !has_finalizer(cluster) {
        debug!("no engine finalizer, nothing to tear down");
        return Ok(Action::await_change());
    }

    let current = cluster.status.clone().unwrap_or_default();
    if current.phase != ClusterPhase::Deleting {
        let next = current.phase(ClusterPhase::Deleting).message("deleting engine resources");
        ctx.kube.patch_status(&namespace, &name, &next).await?;
    }

    match ctx.provider.handle_delete(cluster).await? {
        DeleteStatus::InProgress => {
            debug!("provider teardown in progress");
            Ok(Action::requeue(ctx.config.delete_poll_interval))
        }
        DeleteStatus::Done => {
            info!("provider teardown complete, removing finalizer");
            ctx.kube
                .remove_finalizer(&namespace, &name, CLUSTER_FINALIZER)
                .await?;
            ctx.clear_failures(&cluster_key(cluster));
            Ok(Action::await_change())
        }
    }
}

/// Write phase Failed with a Ready=False condition for a persistent error
///
/// Decides on a freshly fetched copy, like the reconcile pass itself.
async fn surface_failure(
    trigger: &DatabaseCluster,
    ctx: &Context,
    err: &Error,
) -> Result<(), Error> {
    let name = trigger.name_any();
    let namespace = trigger.namespace().unwrap_or_default();
    let Some(cluster) = ctx.kube.get_cluster(&namespace, &name).await? else {
        return Ok(());
    };
    if cluster.engine_kind() != Some(ctx.engine) || cluster.is_deleting() {
        return Ok(());
    }
    let current = cluster.status.clone().unwrap_or_default();
    let next = current
        .clone()
        .phase(ClusterPhase::Failed)
        .message(err.to_string())
        .condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            "ReconcileFailed",
            err.to_string(),
        ));
    if next == current {
        return Ok(());
    }
    warn!(error = %err, "marking cluster as failed");
    ctx.kube.patch_status(&namespace, &name, &next).await
}

fn ready_condition(phase: &ClusterPhase) -> Condition {
    match phase {
        ClusterPhase::Running => Condition::new(
            READY_CONDITION,
            ConditionStatus::True,
            "Running",
            "cluster is running",
        ),
        ClusterPhase::Failed => Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            "EngineFailed",
            "engine reports a failure",
        ),
        ClusterPhase::Creating => Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            "Creating",
            "waiting for the engine to become ready",
        ),
        ClusterPhase::Deleting => Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            "Deleting",
            "cluster is being deleted",
        ),
    }
}

fn has_finalizer(cluster: &DatabaseCluster) -> bool {
    cluster.finalizers().iter().any(|f| f == CLUSTER_FINALIZER)
}

/// Error policy for the controller
///
/// Backs off exponentially on consecutive failures of the same cluster. When
/// `RetryPolicy::max_attempts` is set and exceeded, waits for the next change.
pub fn error_policy(cluster: Arc<DatabaseCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let attempts = ctx.failure_count(&cluster_key(&cluster));
    if ctx.config.retry.exhausted(attempts) {
        error!(
            ?error,
            cluster = %cluster.name_any(),
            attempts,
            "reconciliation failed, retries exhausted until the cluster changes"
        );
        return Action::await_change();
    }

    let delay: Duration = ctx.config.retry.delay_for(attempts);
    error!(
        ?error,
        cluster = %cluster.name_any(),
        attempts,
        retry_in = ?delay,
        "reconciliation failed"
    );
    Action::requeue(delay)
}

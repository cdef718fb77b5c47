//! In-memory fakes shared by the engine tests
//!
//! `FakeKube` keeps clusters, definitions and secrets in maps and records every
//! write, so multi-pass properties (idempotence, credential stability) can be
//! checked without spelling out mock expectations per call.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Secret};
use kube::ResourceExt;
use serde_json::{json, Map, Value};

use strata_common::crd::{
    ComponentDefinition, ComponentPodSpec, ComponentSpec, DatabaseCluster,
    DatabaseClusterDefinition, DatabaseClusterDefinitionSpec, DatabaseClusterSpec,
    DatabaseClusterStatus, EngineKind,
};
use strata_common::{Credentials, Error};

use crate::controller::KubeClient;
use crate::provider::{DeleteStatus, ObservedStatus, Provider, WatchSource};

pub const TEST_NAMESPACE: &str = "db";
pub const TEST_IMAGE: &str = "clickhouse/clickhouse-server:24.3";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

pub fn not_found() -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "not found".to_string(),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

pub fn component(name: &str, type_: &str) -> ComponentSpec {
    ComponentSpec {
        name: name.to_string(),
        type_: type_.to_string(),
        ..Default::default()
    }
}

pub fn cluster_with_components(
    name: &str,
    engine: &str,
    components: Vec<ComponentSpec>,
) -> DatabaseCluster {
    let mut cluster = DatabaseCluster::new(
        name,
        DatabaseClusterSpec {
            engine: engine.to_string(),
            definition_ref: None,
            components,
        },
    );
    cluster.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    cluster.metadata.uid = Some(format!("uid-{name}"));
    cluster
}

/// A definition where every listed type defaults to the ClickHouse server image
pub fn definition_for(name: &str, types: &[&str]) -> DatabaseClusterDefinition {
    let components = types
        .iter()
        .map(|t| {
            (
                t.to_string(),
                ComponentDefinition {
                    defaults: Some(ComponentPodSpec {
                        container: Some(Container {
                            name: "clickhouse".to_string(),
                            image: Some(TEST_IMAGE.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                },
            )
        })
        .collect();
    let mut definition =
        DatabaseClusterDefinition::new(name, DatabaseClusterDefinitionSpec { components });
    definition.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    definition
}

/// Apply a JSON merge patch (RFC 7386) the way the API server does
fn json_merge(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (k, v) in fields {
            if v.is_null() {
                map.remove(k);
            } else {
                json_merge(map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

fn merge_status(cluster: &mut DatabaseCluster, patch: &Value) -> Result<(), Error> {
    let mut stored = serde_json::to_value(&cluster.status)
        .map_err(|e| Error::serialization(e.to_string()))?;
    json_merge(&mut stored, patch);
    cluster.status = Some(
        serde_json::from_value::<DatabaseClusterStatus>(stored)
            .map_err(|e| Error::serialization(e.to_string()))?,
    );
    Ok(())
}

#[derive(Default)]
struct FakeState {
    clusters: BTreeMap<Key, DatabaseCluster>,
    definitions: BTreeMap<Key, DatabaseClusterDefinition>,
    secrets: BTreeMap<Key, Secret>,
    writes: Vec<String>,
}

/// Stateful in-memory stand-in for the API server
#[derive(Default)]
pub struct FakeKube {
    state: Mutex<FakeState>,
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("mutex should not be poisoned")
    }

    pub fn put_cluster(&self, cluster: DatabaseCluster) {
        let k = key(&cluster.namespace().unwrap_or_default(), &cluster.name_any());
        self.lock().clusters.insert(k, cluster);
    }

    pub fn update_cluster(&self, namespace: &str, name: &str, f: impl FnOnce(&mut DatabaseCluster)) {
        if let Some(cluster) = self.lock().clusters.get_mut(&key(namespace, name)) {
            f(cluster);
        }
    }

    pub fn cluster(&self, namespace: &str, name: &str) -> Option<DatabaseCluster> {
        self.lock().clusters.get(&key(namespace, name)).cloned()
    }

    pub fn put_definition(&self, definition: DatabaseClusterDefinition) {
        let k = key(
            &definition.namespace().unwrap_or_default(),
            &definition.name_any(),
        );
        self.lock().definitions.insert(k, definition);
    }

    pub fn remove_definition(&self, namespace: &str, name: &str) {
        self.lock().definitions.remove(&key(namespace, name));
    }

    pub fn put_secret(&self, namespace: &str, secret: Secret) {
        let k = key(namespace, &secret.name_any());
        self.lock().secrets.insert(k, secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseCluster>, Error> {
        Ok(self.cluster(namespace, name))
    }

    async fn get_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseClusterDefinition>, Error> {
        Ok(self.lock().definitions.get(&key(namespace, name)).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<bool, Error> {
        let name = secret.name_any();
        let mut state = self.lock();
        let k = key(namespace, &name);
        if state.secrets.contains_key(&k) {
            return Ok(false);
        }
        state.secrets.insert(k, secret.clone());
        state.writes.push(format!("create_secret {namespace}/{name}"));
        Ok(true)
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let name = secret.name_any();
        let mut state = self.lock();
        let k = key(namespace, &name);
        if !state.secrets.contains_key(&k) {
            return Err(not_found());
        }
        state.secrets.insert(k, secret.clone());
        state.writes.push(format!("replace_secret {namespace}/{name}"));
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &DatabaseClusterStatus,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let cluster = state
            .clusters
            .get_mut(&key(namespace, name))
            .ok_or_else(not_found)?;
        let patch = status
            .merge_patch()
            .map_err(|e| Error::serialization(e.to_string()))?;
        merge_status(cluster, &patch)?;
        state.writes.push(format!("patch_status {namespace}/{name}"));
        Ok(())
    }

    async fn record_restart(
        &self,
        namespace: &str,
        name: &str,
        marker: &str,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let cluster = state
            .clusters
            .get_mut(&key(namespace, name))
            .ok_or_else(not_found)?;
        merge_status(cluster, &json!({ "restartObservedMarker": marker }))?;
        state.writes.push(format!("record_restart {namespace}/{name}"));
        Ok(())
    }

    async fn add_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let cluster = state
            .clusters
            .get_mut(&key(namespace, name))
            .ok_or_else(not_found)?;
        let finalizers = cluster.metadata.finalizers.get_or_insert_with(Vec::new);
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        state.writes.push(format!("add_finalizer {namespace}/{name}"));
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let k = key(namespace, name);
        let Some(cluster) = state.clusters.get_mut(&k) else {
            return Ok(());
        };
        if let Some(finalizers) = cluster.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        let release = cluster.metadata.deletion_timestamp.is_some()
            && cluster.finalizers().is_empty();
        if release {
            state.clusters.remove(&k);
        }
        state.writes.push(format!("remove_finalizer {namespace}/{name}"));
        Ok(())
    }
}

struct ProviderState {
    observed: ObservedStatus,
    credentials: Credentials,
    observe_not_found: bool,
    hang_reconcile: bool,
    calls: Vec<&'static str>,
    last_reconciled: Option<DatabaseCluster>,
}

/// ClickHouse-flavoured provider that records what the engine asked of it
pub struct RecordingProvider {
    state: Mutex<ProviderState>,
}

impl RecordingProvider {
    pub fn new(observed: ObservedStatus) -> Self {
        Self {
            state: Mutex::new(ProviderState {
                observed,
                credentials: Credentials::new("admin", "provider-password"),
                observe_not_found: false,
                hang_reconcile: false,
                calls: Vec::new(),
                last_reconciled: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().expect("mutex should not be poisoned")
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        self.lock().credentials = credentials;
    }

    pub fn fail_observe_with_not_found(&self) {
        self.lock().observe_not_found = true;
    }

    pub fn hang_reconcile(&self) {
        self.lock().hang_reconcile = true;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    fn count(&self, call: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn reconcile_count(&self) -> usize {
        self.count("reconcile")
    }

    pub fn restart_count(&self) -> usize {
        self.count("restart")
    }

    pub fn credentials_calls(&self) -> usize {
        self.count("credentials")
    }

    pub fn last_reconciled(&self) -> Option<DatabaseCluster> {
        self.lock().last_reconciled.clone()
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn engine(&self) -> EngineKind {
        EngineKind::ClickHouse
    }

    fn sources(&self) -> Result<Vec<WatchSource>, Error> {
        Ok(Vec::new())
    }

    async fn reconcile(&self, cluster: &DatabaseCluster) -> Result<(), Error> {
        let hang = {
            let mut state = self.lock();
            state.calls.push("reconcile");
            state.last_reconciled = Some(cluster.clone());
            state.hang_reconcile
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn observe(&self, _cluster: &DatabaseCluster) -> Result<ObservedStatus, Error> {
        let mut state = self.lock();
        state.calls.push("observe");
        if state.observe_not_found {
            return Err(not_found());
        }
        Ok(state.observed.clone())
    }

    async fn handle_delete(&self, _cluster: &DatabaseCluster) -> Result<DeleteStatus, Error> {
        self.lock().calls.push("handle_delete");
        Ok(DeleteStatus::Done)
    }

    async fn default_credentials(&self, _cluster: &DatabaseCluster) -> Result<Credentials, Error> {
        let mut state = self.lock();
        state.calls.push("credentials");
        Ok(state.credentials.clone())
    }

    async fn restart(&self, _cluster: &DatabaseCluster) -> Result<(), Error> {
        self.lock().calls.push("restart");
        Ok(())
    }
}

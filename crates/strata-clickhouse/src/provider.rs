//! ClickHouse provider
//!
//! Applies the Altinity installations with server-side apply and reads their
//! status back. Kubernetes access goes through [`InstallationClient`] so the
//! provider can be tested without an API server.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use strata_common::credentials::default_user_secret_name;
use strata_common::crd::{DatabaseCluster, EngineKind};
use strata_common::kube_utils::is_not_found;
use strata_common::{Credentials, Error, FIELD_MANAGER};
use strata_engine::{DeleteStatus, ObservedStatus, Provider, WatchSource};

use crate::desired::{clickhouse_component, desired_chi, desired_chk, keeper_component};
use crate::status::{is_completed, observed_status};
use crate::{chi_resource, chk_resource};

/// Kubernetes operations the provider needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstallationClient: Send + Sync {
    /// Get an installation; `None` when it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Server-side apply a manifest, forcing ownership of conflicting fields
    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        manifest: &Value,
    ) -> Result<(), Error>;

    /// Delete an installation; a missing object is not an error
    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;

    /// Get a secret; a missing secret surfaces as a not-found error
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error>;
}

/// Real client backed by `Api<DynamicObject>`
pub struct InstallationClientImpl {
    client: Client,
}

impl InstallationClientImpl {
    /// Create a new InstallationClientImpl
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

#[async_trait]
impl InstallationClient for InstallationClientImpl {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        manifest: &Value,
    ) -> Result<(), Error> {
        let obj: DynamicObject = serde_json::from_value(manifest.clone())
            .map_err(|e| Error::serialization_for_kind(&resource.kind, e.to_string()))?;
        self.api(resource, namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&obj),
            )
            .await?;
        info!(kind = %resource.kind, %name, %namespace, "applied installation");
        Ok(())
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        match self
            .api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                info!(kind = %resource.kind, %name, %namespace, "deleted installation");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

/// Provider mapping DatabaseClusters onto Altinity installations
pub struct ClickHouseProvider {
    kube: Arc<dyn InstallationClient>,
}

impl ClickHouseProvider {
    /// Create a provider talking to the API server through `client`
    pub fn new(client: Client) -> Self {
        Self::with_client(Arc::new(InstallationClientImpl::new(client)))
    }

    /// Create a provider over any installation client
    pub fn with_client(kube: Arc<dyn InstallationClient>) -> Self {
        Self { kube }
    }

    async fn apply_keeper(
        &self,
        cluster: &DatabaseCluster,
        restart_marker: Option<&str>,
    ) -> Result<bool, Error> {
        let Some(keeper) = keeper_component(cluster)? else {
            return Ok(true);
        };
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        let chk = desired_chk(cluster, keeper, restart_marker)?;
        self.kube
            .apply(&chk_resource(), &namespace, &name, &chk)
            .await?;

        let completed = self
            .kube
            .get(&chk_resource(), &namespace, &name)
            .await?
            .is_some_and(|obj| is_completed(&obj));
        Ok(completed)
    }

    /// Apply the keeper, then the server once the keeper has completed
    async fn apply_installations(
        &self,
        cluster: &DatabaseCluster,
        restart_marker: Option<&str>,
    ) -> Result<(), Error> {
        // Validate both components before any write
        let chi = desired_chi(cluster, restart_marker)?;
        keeper_component(cluster)?;

        if !self.apply_keeper(cluster, restart_marker).await? {
            debug!("keeper not completed yet, deferring ClickHouseInstallation");
            return Ok(());
        }

        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        self.kube
            .apply(&chi_resource(), &namespace, &name, &chi)
            .await
    }
}

fn honored_marker(cluster: &DatabaseCluster) -> Option<&str> {
    cluster
        .status
        .as_ref()
        .and_then(|s| s.restart_observed_marker.as_deref())
}

#[async_trait]
impl Provider for ClickHouseProvider {
    fn engine(&self) -> EngineKind {
        EngineKind::ClickHouse
    }

    fn sources(&self) -> Result<Vec<WatchSource>, Error> {
        Ok(vec![
            WatchSource::new(chi_resource()),
            WatchSource::new(chk_resource()),
        ])
    }

    async fn reconcile(&self, cluster: &DatabaseCluster) -> Result<(), Error> {
        self.apply_installations(cluster, honored_marker(cluster)).await
    }

    async fn observe(&self, cluster: &DatabaseCluster) -> Result<ObservedStatus, Error> {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        let server = clickhouse_component(cluster)?;

        let Some(chi) = self.kube.get(&chi_resource(), &namespace, &name).await? else {
            return Ok(ObservedStatus::default());
        };

        let keeper = match keeper_component(cluster)? {
            Some(keeper) => Some((
                keeper.name.as_str(),
                self.kube.get(&chk_resource(), &namespace, &name).await?,
            )),
            None => None,
        };

        Ok(observed_status(
            &server.name,
            &chi,
            keeper.as_ref().map(|(n, chk)| (*n, chk.as_ref())),
        ))
    }

    async fn handle_delete(&self, cluster: &DatabaseCluster) -> Result<DeleteStatus, Error> {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();

        let mut remaining = 0;
        for resource in [chi_resource(), chk_resource()] {
            let Some(obj) = self.kube.get(&resource, &namespace, &name).await? else {
                continue;
            };
            remaining += 1;
            if obj.metadata.deletion_timestamp.is_none() {
                self.kube.delete(&resource, &namespace, &name).await?;
            }
        }

        if remaining == 0 {
            Ok(DeleteStatus::Done)
        } else {
            debug!(remaining, "waiting for installations to be removed");
            Ok(DeleteStatus::InProgress)
        }
    }

    async fn default_credentials(&self, cluster: &DatabaseCluster) -> Result<Credentials, Error> {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        let secret_name = default_user_secret_name(&name);
        let secret = self.kube.get_secret(&namespace, &secret_name).await?;
        Credentials::from_secret(&secret).ok_or_else(|| {
            Error::provider_for(
                &name,
                EngineKind::ClickHouse.as_str(),
                format!("secret {secret_name} is missing username or password"),
            )
        })
    }

    /// Roll pods by stamping the requested marker on both pod templates
    ///
    /// While the keeper is still coming up the server installation is left
    /// alone; the next reconcile applies it with the marker once honored.
    async fn restart(&self, cluster: &DatabaseCluster) -> Result<(), Error> {
        let marker = cluster.restart_marker();
        info!(?marker, "rolling ClickHouse pods");
        self.apply_installations(cluster, marker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RESTARTED_AT_ANNOTATION;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use strata_common::crd::{ClusterPhase, ComponentSpec, DatabaseClusterSpec, DatabaseClusterStatus};

    fn component(name: &str, type_: &str) -> ComponentSpec {
        ComponentSpec {
            name: name.to_string(),
            type_: type_.to_string(),
            ..Default::default()
        }
    }

    fn cluster(components: Vec<ComponentSpec>) -> DatabaseCluster {
        let mut c = DatabaseCluster::new(
            "orders",
            DatabaseClusterSpec {
                engine: "clickhouse".to_string(),
                definition_ref: None,
                components,
            },
        );
        c.metadata.namespace = Some("db".to_string());
        c.metadata.uid = Some("uid-1".to_string());
        c
    }

    fn with_keeper() -> DatabaseCluster {
        cluster(vec![
            component("server", "clickhouse"),
            component("keeper", "clickhouse-keeper"),
        ])
    }

    fn installation(resource: &ApiResource, status: &str) -> DynamicObject {
        let mut obj = DynamicObject::new("orders", resource).within("db");
        obj.data = json!({ "status": { "status": status } });
        obj
    }

    fn not_found() -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        }))
    }

    fn provider(mock: MockInstallationClient) -> ClickHouseProvider {
        ClickHouseProvider::with_client(Arc::new(mock))
    }

    #[test]
    fn sources_cover_both_installations() {
        let sources = provider(MockInstallationClient::new()).sources().unwrap();
        let kinds: Vec<_> = sources.iter().map(|s| s.api_resource.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ClickHouseInstallation", "ClickHouseKeeperInstallation"]);
        assert!(sources.iter().all(|s| s.label_selector.is_none()));
    }

    #[tokio::test]
    async fn story_server_only_cluster_applies_one_installation() {
        let mut mock = MockInstallationClient::new();
        mock.expect_apply()
            .withf(|r, ns, name, manifest| {
                r.kind == "ClickHouseInstallation"
                    && ns == "db"
                    && name == "orders"
                    && manifest["kind"] == "ClickHouseInstallation"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let c = cluster(vec![component("server", "clickhouse")]);
        provider(mock).reconcile(&c).await.unwrap();
    }

    #[tokio::test]
    async fn story_keeper_is_applied_before_server() {
        let mut seq = mockall::Sequence::new();
        let mut mock = MockInstallationClient::new();
        mock.expect_apply()
            .withf(|r, _, _, _| r.kind == "ClickHouseKeeperInstallation")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        mock.expect_get()
            .withf(|r, _, _| r.kind == "ClickHouseKeeperInstallation")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r, _, _| Ok(Some(installation(r, "Completed"))));
        mock.expect_apply()
            .withf(|r, _, _, _| r.kind == "ClickHouseInstallation")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));

        provider(mock).reconcile(&with_keeper()).await.unwrap();
    }

    #[tokio::test]
    async fn server_waits_for_keeper_to_complete() {
        let mut mock = MockInstallationClient::new();
        mock.expect_apply()
            .withf(|r, _, _, _| r.kind == "ClickHouseKeeperInstallation")
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        mock.expect_get()
            .returning(|r, _, _| Ok(Some(installation(r, "InProgress"))));
        mock.expect_apply()
            .withf(|r, _, _, _| r.kind == "ClickHouseInstallation")
            .never();

        provider(mock).reconcile(&with_keeper()).await.unwrap();
    }

    #[tokio::test]
    async fn bad_cardinality_writes_nothing() {
        let mut mock = MockInstallationClient::new();
        mock.expect_apply().never();

        let two_keepers = cluster(vec![
            component("server", "clickhouse"),
            component("k1", "clickhouse-keeper"),
            component("k2", "clickhouse-keeper"),
        ]);
        let err = provider(mock).reconcile(&two_keepers).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn reconcile_uses_honored_restart_marker() {
        let mut mock = MockInstallationClient::new();
        mock.expect_apply()
            .withf(|_, _, _, manifest| {
                manifest["spec"]["templates"]["podTemplates"][0]["metadata"]["annotations"]
                    [RESTARTED_AT_ANNOTATION]
                    == "r1"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut c = cluster(vec![component("server", "clickhouse")]);
        c.metadata.annotations = Some(BTreeMap::from([(
            strata_common::RESTART_ANNOTATION.to_string(),
            "r2".to_string(),
        )]));
        c.status = Some(DatabaseClusterStatus {
            restart_observed_marker: Some("r1".to_string()),
            ..Default::default()
        });
        provider(mock).reconcile(&c).await.unwrap();
    }

    #[tokio::test]
    async fn restart_applies_requested_marker() {
        let mut mock = MockInstallationClient::new();
        mock.expect_apply()
            .withf(|r, _, _, manifest| {
                r.kind == "ClickHouseInstallation"
                    && manifest["spec"]["templates"]["podTemplates"][0]["metadata"]["annotations"]
                        [RESTARTED_AT_ANNOTATION]
                        == "r2"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut c = cluster(vec![component("server", "clickhouse")]);
        c.metadata.annotations = Some(BTreeMap::from([(
            strata_common::RESTART_ANNOTATION.to_string(),
            "r2".to_string(),
        )]));
        provider(mock).restart(&c).await.unwrap();
    }

    #[tokio::test]
    async fn restart_waits_for_keeper_before_server() {
        let mut mock = MockInstallationClient::new();
        mock.expect_apply()
            .withf(|r, _, _, manifest| {
                r.kind == "ClickHouseKeeperInstallation"
                    && manifest["spec"]["templates"]["podTemplates"][0]["metadata"]["annotations"]
                        [RESTARTED_AT_ANNOTATION]
                        == "r1"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        mock.expect_get()
            .returning(|r, _, _| Ok(Some(installation(r, "InProgress"))));
        mock.expect_apply()
            .withf(|r, _, _, _| r.kind == "ClickHouseInstallation")
            .never();

        let mut c = with_keeper();
        c.metadata.annotations = Some(BTreeMap::from([(
            strata_common::RESTART_ANNOTATION.to_string(),
            "r1".to_string(),
        )]));
        provider(mock).restart(&c).await.unwrap();
    }

    #[tokio::test]
    async fn observe_without_installation_is_empty() {
        let mut mock = MockInstallationClient::new();
        mock.expect_get().times(1).returning(|_, _, _| Ok(None));

        let c = cluster(vec![component("server", "clickhouse")]);
        let observed = provider(mock).observe(&c).await.unwrap();
        assert_eq!(observed, ObservedStatus::default());
    }

    #[tokio::test]
    async fn story_observe_combines_server_and_keeper() {
        let mut mock = MockInstallationClient::new();
        mock.expect_get()
            .returning(|r, _, _| Ok(Some(installation(r, "Completed"))));

        let observed = provider(mock).observe(&with_keeper()).await.unwrap();
        assert_eq!(observed.phase, ClusterPhase::Running);
        let names: Vec<_> = observed.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["server", "keeper"]);
    }

    #[tokio::test]
    async fn story_delete_waits_until_installations_are_gone() {
        let mut mock = MockInstallationClient::new();
        mock.expect_get()
            .returning(|r, _, _| Ok(Some(installation(r, "Completed"))));
        mock.expect_delete().times(2).returning(|_, _, _| Ok(()));

        let c = with_keeper();
        assert_eq!(provider(mock).handle_delete(&c).await.unwrap(), DeleteStatus::InProgress);

        let mut mock = MockInstallationClient::new();
        mock.expect_get().returning(|r, _, _| {
            let mut obj = installation(r, "Terminating");
            obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
            Ok(Some(obj))
        });
        mock.expect_delete().never();
        assert_eq!(provider(mock).handle_delete(&c).await.unwrap(), DeleteStatus::InProgress);

        let mut mock = MockInstallationClient::new();
        mock.expect_get().returning(|_, _, _| Ok(None));
        mock.expect_delete().never();
        assert_eq!(provider(mock).handle_delete(&c).await.unwrap(), DeleteStatus::Done);
    }

    #[tokio::test]
    async fn default_credentials_read_default_user_secret() {
        let mut mock = MockInstallationClient::new();
        mock.expect_get_secret()
            .withf(|ns, name| ns == "db" && name == "orders-default-user")
            .returning(|_, _| {
                Ok(Secret {
                    string_data: Some(Credentials::new("admin", "s3cret").string_data()),
                    ..Default::default()
                })
            });

        let creds = provider(mock)
            .default_credentials(&cluster(vec![component("server", "clickhouse")]))
            .await
            .unwrap();
        assert_eq!(creds, Credentials::new("admin", "s3cret"));
    }

    #[tokio::test]
    async fn missing_secret_is_not_found_and_incomplete_secret_is_an_error() {
        let c = cluster(vec![component("server", "clickhouse")]);

        let mut mock = MockInstallationClient::new();
        mock.expect_get_secret().returning(|_, _| Err(not_found()));
        assert!(provider(mock).default_credentials(&c).await.unwrap_err().is_not_found());

        let mut mock = MockInstallationClient::new();
        mock.expect_get_secret().returning(|_, _| Ok(Secret::default()));
        let err = provider(mock).default_credentials(&c).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("orders-default-user"));
    }
}

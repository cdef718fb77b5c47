//! Desired-state builders for Altinity objects
//!
//! Pure functions from a definition-resolved DatabaseCluster to the JSON
//! manifests that get server-side applied. Nothing here talks to the API server.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimSpec, PodSpec, ResourceRequirements, VolumeMount,
    VolumeResourceRequirements,
};
use kube::ResourceExt;
use serde_json::{json, Map, Value};

use strata_common::credentials::{default_user_secret_name, DEFAULT_USERNAME, PASSWORD_KEY};
use strata_common::crd::{ComponentSpec, DatabaseCluster};
use strata_common::kube_utils::{managed_labels, owner_reference};
use strata_common::Error;

use crate::{
    CHI_API_VERSION, CHI_KIND, CHK_API_VERSION, CHK_KIND, COMPONENT_CLICKHOUSE,
    COMPONENT_KEEPER, RESTARTED_AT_ANNOTATION,
};

/// Name of the data volume claim template
pub const DATA_VOLUME: &str = "data";

/// Name of the pod template both installations reference
pub const POD_TEMPLATE: &str = "clickhouse-default";

/// Where ClickHouse keeps its data
pub const DATA_MOUNT_PATH: &str = "/var/lib/clickhouse";

const ENGINE: &str = "clickhouse";

/// The single `clickhouse` component
pub fn clickhouse_component(cluster: &DatabaseCluster) -> Result<&ComponentSpec, Error> {
    match cluster.components_of_type(COMPONENT_CLICKHOUSE).as_slice() {
        [component] => Ok(component),
        other => Err(Error::provider_permanent(
            cluster.name_any(),
            ENGINE,
            format!(
                "expected exactly one {COMPONENT_CLICKHOUSE} component, found {}",
                other.len()
            ),
        )),
    }
}

/// The optional `clickhouse-keeper` component
pub fn keeper_component(cluster: &DatabaseCluster) -> Result<Option<&ComponentSpec>, Error> {
    match cluster.components_of_type(COMPONENT_KEEPER).as_slice() {
        [] => Ok(None),
        [component] => Ok(Some(component)),
        other => Err(Error::provider_permanent(
            cluster.name_any(),
            ENGINE,
            format!(
                "expected at most one {COMPONENT_KEEPER} component, found {}",
                other.len()
            ),
        )),
    }
}

/// ClickHouseInstallation manifest for `cluster`
///
/// `restart_marker`, when set, lands on the pod template as
/// `strata.dev/restarted-at`; changing it rolls the pods.
pub fn desired_chi(cluster: &DatabaseCluster, restart_marker: Option<&str>) -> Result<Value, Error> {
    let component = clickhouse_component(cluster)?;
    let container = primary_container(component, "clickhouse", Some(DATA_MOUNT_PATH));

    let mut configuration = Map::new();
    configuration.insert("users".to_string(), users(cluster));
    if let Some(zookeeper) = zookeeper(cluster, component)? {
        configuration.insert("zookeeper".to_string(), zookeeper);
    }
    configuration.insert(
        "clusters".to_string(),
        json!([cluster_entry(component, json!({ "podTemplate": POD_TEMPLATE }))]),
    );

    Ok(json!({
        "apiVersion": CHI_API_VERSION,
        "kind": CHI_KIND,
        "metadata": metadata(cluster)?,
        "spec": {
            "configuration": configuration,
            "templates": templates(component, container, restart_marker)?,
        },
    }))
}

/// ClickHouseKeeperInstallation manifest for the keeper component
pub fn desired_chk(
    cluster: &DatabaseCluster,
    keeper: &ComponentSpec,
    restart_marker: Option<&str>,
) -> Result<Value, Error> {
    let container = primary_container(keeper, "clickhouse-keeper", None);

    let mut cluster_templates = json!({ "podTemplate": POD_TEMPLATE });
    if keeper.storage.is_some() {
        cluster_templates["dataVolumeClaimTemplate"] = json!(DATA_VOLUME);
    }

    Ok(json!({
        "apiVersion": CHK_API_VERSION,
        "kind": CHK_KIND,
        "metadata": metadata(cluster)?,
        "spec": {
            "configuration": {
                "clusters": [cluster_entry(keeper, cluster_templates)],
            },
            "templates": templates(keeper, container, restart_marker)?,
        },
    }))
}

fn metadata(cluster: &DatabaseCluster) -> Result<Value, Error> {
    let mut metadata = json!({
        "name": cluster.name_any(),
        "namespace": cluster.namespace().unwrap_or_default(),
        "labels": managed_labels(&cluster.name_any()),
    });
    if let Some(owner) = owner_reference(cluster) {
        metadata["ownerReferences"] = json!([serde_json::to_value(owner)?]);
    }
    Ok(metadata)
}

/// Admin password wired from the default-user secret
fn users(cluster: &DatabaseCluster) -> Value {
    json!({
        format!("{DEFAULT_USERNAME}/password"): {
            "valueFrom": {
                "secretKeyRef": {
                    "name": default_user_secret_name(&cluster.name_any()),
                    "key": PASSWORD_KEY,
                }
            }
        }
    })
}

/// `zookeeper` section from `customSpec`; empty objects are ignored
fn zookeeper(cluster: &DatabaseCluster, component: &ComponentSpec) -> Result<Option<Value>, Error> {
    let Some(custom) = component.custom_spec.as_ref() else {
        return Ok(None);
    };
    let Some(custom) = custom.as_object() else {
        return Err(Error::provider_permanent(
            cluster.name_any(),
            ENGINE,
            format!("customSpec of component {} must be an object", component.name),
        ));
    };
    Ok(custom
        .get("zookeeper")
        .filter(|zk| zk.as_object().is_some_and(|o| !o.is_empty()))
        .cloned())
}

fn cluster_entry(component: &ComponentSpec, templates: Value) -> Value {
    let mut entry = json!({
        "name": component.name,
        "templates": templates,
    });
    if component.shards.is_some() || component.replicas.is_some() {
        let mut layout = Map::new();
        if let Some(shards) = component.shards {
            layout.insert("shardsCount".to_string(), json!(shards));
        }
        if let Some(replicas) = component.replicas {
            layout.insert("replicasCount".to_string(), json!(replicas));
        }
        entry["layout"] = Value::Object(layout);
    }
    entry
}

/// Primary container from the definition with spec overrides applied
fn primary_container(
    component: &ComponentSpec,
    default_name: &str,
    data_mount: Option<&str>,
) -> Container {
    let mut container = component
        .pod_spec
        .as_ref()
        .and_then(|p| p.container.clone())
        .unwrap_or_default();

    if container.name.is_empty() {
        container.name = default_name.to_string();
    }
    if let Some(image) = &component.image {
        container.image = Some(image.clone());
    }
    if let (Some(path), Some(_)) = (data_mount, &component.storage) {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: path.to_string(),
                ..Default::default()
            });
    }
    if let Some(resources) = &component.resources {
        let limits = container
            .resources
            .get_or_insert_with(ResourceRequirements::default)
            .limits
            .get_or_insert_with(BTreeMap::new);
        if let Some(cpu) = &resources.cpu {
            limits.insert("cpu".to_string(), cpu.clone());
        }
        if let Some(memory) = &resources.memory {
            limits.insert("memory".to_string(), memory.clone());
        }
    }
    container
}

fn templates(
    component: &ComponentSpec,
    container: Container,
    restart_marker: Option<&str>,
) -> Result<Value, Error> {
    let pod = component.pod_spec.clone().unwrap_or_default();

    let mut containers = vec![container];
    containers.extend(pod.sidecars);
    let spec = PodSpec {
        containers,
        volumes: (!pod.volumes.is_empty()).then_some(pod.volumes),
        service_account_name: pod.service_account_name,
        image_pull_secrets: (!pod.image_pull_secrets.is_empty()).then_some(pod.image_pull_secrets),
        ..Default::default()
    };

    let mut annotations = pod.annotations;
    if let Some(marker) = restart_marker {
        annotations.insert(RESTARTED_AT_ANNOTATION.to_string(), marker.to_string());
    }

    let mut volume_claims = Vec::new();
    if let Some(storage) = &component.storage {
        let spec = PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    storage.size.clone(),
                )])),
                ..Default::default()
            }),
            storage_class_name: storage.storage_class.clone(),
            ..Default::default()
        };
        volume_claims.push(json!({ "name": DATA_VOLUME, "spec": spec }));
    }
    for pvc in pod.additional_volume_claim_templates {
        volume_claims.push(json!({
            "name": pvc.metadata.name.unwrap_or_default(),
            "spec": serde_json::to_value(pvc.spec.unwrap_or_default())?,
        }));
    }

    let mut templates = json!({
        "podTemplates": [{
            "name": POD_TEMPLATE,
            "metadata": {
                "labels": pod.labels,
                "annotations": annotations,
            },
            "spec": serde_json::to_value(spec)?,
        }],
    });
    if !volume_claims.is_empty() {
        templates["volumeClaimTemplates"] = Value::Array(volume_claims);
    }
    Ok(templates)
}

//! DatabaseClusterDefinition CRD
//!
//! Engine-owned catalog of per-component pod defaults. Operators manage these
//! objects out of band; the controller only ever reads them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, LocalObjectReference, PersistentVolumeClaim, Volume,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a DatabaseClusterDefinition
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "DatabaseClusterDefinition",
    plural = "databaseclusterdefinitions",
    shortname = "dbdef",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterDefinitionSpec {
    /// Component definitions keyed by component `type`
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDefinition>,
}

/// Defaults for one component type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    /// Pod defaults merged into every component of this type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<ComponentPodSpec>,
}

/// Pod-level defaults for a component
///
/// Attached to `ComponentSpec::pod_spec` at reconcile time; never persisted on the
/// DatabaseCluster itself.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPodSpec {
    /// Pod annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Pod labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Primary container template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,

    /// Additional containers run next to the primary one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<Container>,

    /// Extra pod volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Service account the pods run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Pull secrets for private registries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Volume claim templates added next to the data volume
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_volume_claim_templates: Vec<PersistentVolumeClaim>,
}

impl DatabaseClusterDefinitionSpec {
    /// Look up the defaults for a component type
    ///
    /// Returns `None` when the type is unknown. A known type without explicit
    /// defaults yields an empty pod spec.
    pub fn defaults_for(&self, component_type: &str) -> Option<ComponentPodSpec> {
        self.components
            .get(component_type)
            .map(|def| def.defaults.clone().unwrap_or_default())
    }
}

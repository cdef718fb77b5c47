//! DatabaseCluster Custom Resource Definition
//!
//! The DatabaseCluster CRD is the engine-agnostic declaration of a database
//! cluster. The `engine` field selects which provider reconciles it; everything
//! engine-specific lives behind that provider.

use std::collections::HashSet;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::definition::ComponentPodSpec;
use super::types::{ClusterPhase, Condition, EngineKind};
use crate::RESTART_ANNOTATION;

/// Specification for a DatabaseCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "DatabaseCluster",
    plural = "databaseclusters",
    shortname = "dbc",
    status = "DatabaseClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Engine","type":"string","jsonPath":".spec.engine"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.connectionUrl"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterSpec {
    /// Engine that owns this cluster (clickhouse, pxc, postgresql, psmdb)
    ///
    /// Kept as a string so clusters for engines this build does not know still
    /// deserialize. Changing it after creation is not supported.
    pub engine: String,

    /// Name of the DatabaseClusterDefinition in the cluster's namespace
    ///
    /// Defaults to `<engine>-definition`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_ref: Option<String>,

    /// Ordered component list
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

/// One component of a cluster (server, keeper, proxy, ...)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Logical component name, unique within the cluster
    pub name: String,

    /// Component type; join key into the definition's component map
    #[serde(rename = "type")]
    pub type_: String,

    /// Engine version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Container image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Persistent storage request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,

    /// Resource limits for the primary container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ComponentResources>,

    /// Provider-interpreted settings; not validated here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub custom_spec: Option<serde_json::Value>,

    /// Replicas per shard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,

    /// Number of shards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<u32>,

    /// Pod defaults attached from the cluster definition at reconcile time
    #[serde(skip)]
    pub pod_spec: Option<ComponentPodSpec>,
}

/// Persistent storage request
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    /// Requested size (e.g. "10Gi")
    pub size: Quantity,

    /// Storage class; cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// CPU and memory limits
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentResources {
    /// CPU limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Quantity>,

    /// Memory limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Quantity>,
}

fn preserve_unknown_fields(_: &mut schemars::gen::SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [
            ("nullable".to_string(), serde_json::Value::Bool(true)),
            (
                "x-kubernetes-preserve-unknown-fields".to_string(),
                serde_json::Value::Bool(true),
            ),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    })
}

impl ComponentSpec {
    /// Validate this component's own fields
    fn validate(&self, cluster: &str, index: usize) -> Result<(), crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::validation_for_field(
                cluster,
                format!("spec.components[{index}].name"),
                "component name cannot be empty",
            ));
        }
        if self.type_.is_empty() {
            return Err(crate::Error::validation_for_field(
                cluster,
                format!("spec.components[{index}].type"),
                format!("component {} has no type", self.name),
            ));
        }
        if self.replicas == Some(0) {
            return Err(crate::Error::validation_for_field(
                cluster,
                format!("spec.components[{index}].replicas"),
                "replicas must be at least 1",
            ));
        }
        if self.shards == Some(0) {
            return Err(crate::Error::validation_for_field(
                cluster,
                format!("spec.components[{index}].shards"),
                "shards must be at least 1",
            ));
        }
        Ok(())
    }

    /// Image from the spec override, falling back to the definition's container
    pub fn effective_image(&self) -> Option<String> {
        self.image.clone().or_else(|| {
            self.pod_spec
                .as_ref()
                .and_then(|p| p.container.as_ref())
                .and_then(|c| c.image.clone())
        })
    }
}

/// Reference to an object in the cluster's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LocalRef {
    /// Object name
    pub name: String,
}

impl LocalRef {
    /// Create a reference by name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Observed state of one component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Component name as declared in the spec
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Pods backing the component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pods: Vec<LocalRef>,

    /// Desired pod count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i32>,

    /// Ready pod count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<i32>,

    /// Engine-reported state string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Status for a DatabaseCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterStatus {
    /// The generation of the spec that was last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Current lifecycle phase
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Client connection endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_url: Option<String>,

    /// Secret holding `username`/`password` for the default user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_secret_ref: Option<LocalRef>,

    /// Per-component status
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentStatus>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions representing the cluster state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Last value of the restart annotation that was acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_observed_marker: Option<String>,
}

impl DatabaseClusterStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: ClusterPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the phase and return self for chaining
    pub fn phase(mut self, phase: ClusterPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Add a condition and return self for chaining
    ///
    /// Replaces any condition of the same type. When the replaced condition has the
    /// same status, reason and message, its transition time is kept.
    pub fn condition(mut self, mut condition: Condition) -> Self {
        if let Some(existing) = self.conditions.iter().find(|c| c.type_ == condition.type_) {
            if existing.same_state(&condition) {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }

    /// Look up a condition by type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Body for a JSON merge patch that makes the stored status equal to `self`
    ///
    /// Unset fields are sent as `null` so the server drops any previous value.
    pub fn merge_patch(&self) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(fields) = value.as_object_mut() {
            for field in STATUS_FIELDS {
                fields.entry(*field).or_insert(serde_json::Value::Null);
            }
        }
        Ok(value)
    }
}

/// Every serialized field of [`DatabaseClusterStatus`]
const STATUS_FIELDS: &[&str] = &[
    "observedGeneration",
    "phase",
    "connectionUrl",
    "credentialSecretRef",
    "components",
    "message",
    "conditions",
    "restartObservedMarker",
];

impl DatabaseCluster {
    /// Parsed engine identity; `None` for engines this build does not know
    pub fn engine_kind(&self) -> Option<EngineKind> {
        self.spec.engine.parse().ok()
    }

    /// Name of the DatabaseClusterDefinition this cluster resolves against
    pub fn definition_name(&self) -> String {
        self.spec
            .definition_ref
            .clone()
            .unwrap_or_else(|| format!("{}-definition", self.spec.engine.to_lowercase()))
    }

    /// Current value of the restart annotation, if any
    pub fn restart_marker(&self) -> Option<&str> {
        self.annotations()
            .get(RESTART_ANNOTATION)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// True once a deletion timestamp is set
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Components of the given type, in declaration order
    pub fn components_of_type(&self, type_: &str) -> Vec<&ComponentSpec> {
        self.spec
            .components
            .iter()
            .filter(|c| c.type_ == type_)
            .collect()
    }

    /// Validate the cluster specification
    ///
    /// Presence of optional fields is checked here once; providers can rely on
    /// `type`, `name`, and positive counts afterwards.
    pub fn validate(&self) -> Result<(), crate::Error> {
        let cluster = self.name_any();
        if self.spec.engine.is_empty() {
            return Err(crate::Error::validation_for_field(
                &cluster,
                "spec.engine",
                "engine cannot be empty",
            ));
        }
        if self.spec.components.is_empty() {
            return Err(crate::Error::validation_for_field(
                &cluster,
                "spec.components",
                "at least one component is required",
            ));
        }

        let mut seen = HashSet::new();
        for (index, component) in self.spec.components.iter().enumerate() {
            component.validate(&cluster, index)?;
            if !seen.insert(component.name.as_str()) {
                return Err(crate::Error::validation_for_field(
                    &cluster,
                    format!("spec.components[{index}].name"),
                    format!("duplicate component name {}", component.name),
                ));
            }
        }
        Ok(())
    }
}

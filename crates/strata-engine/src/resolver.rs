//! Definition resolver
//!
//! Attaches per-type pod defaults from a `DatabaseClusterDefinition` to each
//! component. The result is an in-memory copy handed to the provider; the
//! persisted spec is never touched.

use kube::ResourceExt;
use tracing::debug;

use strata_common::crd::{DatabaseCluster, DatabaseClusterDefinition};
use strata_common::Error;

/// Return a copy of `cluster` with every component's `pod_spec` filled in
///
/// Fails when any component's type has no entry in the definition.
pub fn resolve_definitions(
    cluster: &DatabaseCluster,
    definition: &DatabaseClusterDefinition,
) -> Result<DatabaseCluster, Error> {
    let mut resolved = cluster.clone();
    for (index, component) in resolved.spec.components.iter_mut().enumerate() {
        let defaults = definition
            .spec
            .defaults_for(&component.type_)
            .ok_or_else(|| {
                Error::validation_for_field(
                    cluster.name_any(),
                    format!("spec.components[{index}].type"),
                    format!(
                        "component type {} is not defined in {}",
                        component.type_,
                        definition.name_any()
                    ),
                )
            })?;
        debug!(component = %component.name, type_ = %component.type_, "attached pod defaults");
        component.pod_spec = Some(defaults);
    }
    Ok(resolved)
}

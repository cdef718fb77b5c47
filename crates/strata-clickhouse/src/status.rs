//! Projection of Altinity installation status into the common shape

use kube::api::DynamicObject;
use serde_json::Value;

use strata_common::crd::{ClusterPhase, ComponentStatus, LocalRef};
use strata_engine::ObservedStatus;

/// Installation finished applying
pub const STATUS_COMPLETED: &str = "Completed";
/// Installation is rolling out
pub const STATUS_IN_PROGRESS: &str = "InProgress";
/// Installation is being removed
pub const STATUS_TERMINATING: &str = "Terminating";
/// Installation gave up
pub const STATUS_ABORTED: &str = "Aborted";

/// Map an Altinity status string onto a cluster phase
///
/// Anything unrecognized, including an empty status on a fresh object, reads
/// as still creating.
pub fn phase_from_status(status: Option<&str>) -> ClusterPhase {
    match status {
        Some(STATUS_COMPLETED) => ClusterPhase::Running,
        Some(STATUS_ABORTED) => ClusterPhase::Failed,
        Some(STATUS_TERMINATING) => ClusterPhase::Deleting,
        _ => ClusterPhase::Creating,
    }
}

/// The raw status string of an installation
pub fn installation_state(obj: &DynamicObject) -> Option<&str> {
    obj.data
        .get("status")
        .and_then(|s| s.get("status"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// True once an installation reports `Completed`
pub fn is_completed(obj: &DynamicObject) -> bool {
    installation_state(obj) == Some(STATUS_COMPLETED)
}

/// Component status read from an installation's `.status`
pub fn component_status(name: &str, obj: &DynamicObject) -> ComponentStatus {
    let status = obj.data.get("status");
    let int = |key: &str| {
        status
            .and_then(|s| s.get(key))
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok())
    };
    let pods = status
        .and_then(|s| s.get("pods"))
        .and_then(Value::as_array)
        .map(|pods| {
            pods.iter()
                .filter_map(Value::as_str)
                .map(LocalRef::new)
                .collect()
        })
        .unwrap_or_default();

    ComponentStatus {
        name: name.to_string(),
        pods,
        total: int("hosts"),
        ready: int("hostsCompleted"),
        state: installation_state(obj).map(str::to_string),
    }
}

/// Combine the server installation and the optional keeper installation
///
/// `keeper` is `Some((name, None))` when a keeper component is declared but its
/// installation does not exist yet. The cluster is Running only when every
/// declared installation is; a failed keeper fails the cluster.
pub fn observed_status(
    server_name: &str,
    chi: &DynamicObject,
    keeper: Option<(&str, Option<&DynamicObject>)>,
) -> ObservedStatus {
    let mut phase = phase_from_status(installation_state(chi));
    let mut message = installation_state(chi)
        .filter(|_| phase == ClusterPhase::Failed)
        .map(|s| format!("ClickHouseInstallation reports {s}"));
    let mut components = vec![component_status(server_name, chi)];

    if let Some((keeper_name, chk)) = keeper {
        let keeper_phase = match chk {
            Some(chk) => {
                components.push(component_status(keeper_name, chk));
                phase_from_status(installation_state(chk))
            }
            None => {
                components.push(ComponentStatus {
                    name: keeper_name.to_string(),
                    ..Default::default()
                });
                ClusterPhase::Creating
            }
        };
        match (&phase, keeper_phase) {
            (ClusterPhase::Failed | ClusterPhase::Deleting, _) => {}
            (_, ClusterPhase::Failed) => {
                phase = ClusterPhase::Failed;
                message = Some("ClickHouseKeeperInstallation reports Aborted".to_string());
            }
            (ClusterPhase::Running, ClusterPhase::Creating | ClusterPhase::Deleting) => {
                phase = ClusterPhase::Creating;
            }
            _ => {}
        }
    }

    let connection_url = chi
        .data
        .get("status")
        .and_then(|s| s.get("endpoint"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    ObservedStatus {
        phase,
        connection_url,
        components,
        message,
    }
}

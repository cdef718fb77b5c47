//! ClickHouse provider for Strata
//!
//! Maps a DatabaseCluster onto Altinity operator objects: one
//! `ClickHouseInstallation` for the `clickhouse` component and, when declared, one
//! `ClickHouseKeeperInstallation` for the `clickhouse-keeper` component. Both are
//! named after the cluster.

pub mod desired;
pub mod provider;
pub mod status;

pub use provider::ClickHouseProvider;

use kube::discovery::ApiResource;
use strata_common::kube_utils::build_api_resource;

/// Component type served by the ClickHouseInstallation
pub const COMPONENT_CLICKHOUSE: &str = "clickhouse";

/// Component type served by the ClickHouseKeeperInstallation
pub const COMPONENT_KEEPER: &str = "clickhouse-keeper";

/// ClickHouseInstallation apiVersion
pub const CHI_API_VERSION: &str = "clickhouse.altinity.com/v1";

/// ClickHouseInstallation kind
pub const CHI_KIND: &str = "ClickHouseInstallation";

/// ClickHouseKeeperInstallation apiVersion
pub const CHK_API_VERSION: &str = "clickhouse-keeper.altinity.com/v1";

/// ClickHouseKeeperInstallation kind
pub const CHK_KIND: &str = "ClickHouseKeeperInstallation";

/// Pod template annotation bumped to roll pods
pub const RESTARTED_AT_ANNOTATION: &str = "strata.dev/restarted-at";

/// ApiResource for ClickHouseInstallation
pub fn chi_resource() -> ApiResource {
    build_api_resource(CHI_API_VERSION, CHI_KIND, "clickhouseinstallations")
}

/// ApiResource for ClickHouseKeeperInstallation
pub fn chk_resource() -> ApiResource {
    build_api_resource(CHK_API_VERSION, CHK_KIND, "clickhousekeeperinstallations")
}

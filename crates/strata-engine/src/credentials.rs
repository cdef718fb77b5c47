//! Credential manager
//!
//! Owns the two per-cluster secrets. The default-user secret is created once and
//! never rewritten; the internal mirror tracks whatever the provider reports.

use kube::ResourceExt;
use tracing::{debug, info};

use strata_common::credentials::{credential_secret_name, default_user_secret_name};
use strata_common::crd::{DatabaseCluster, LocalRef};
use strata_common::{Credentials, Error};

use crate::controller::KubeClient;

/// Create the default-user secret if it does not exist yet
///
/// An existing secret is left untouched whatever it contains. Losing a create
/// race to another writer counts as success.
pub async fn ensure_default_secret(
    kube: &dyn KubeClient,
    cluster: &DatabaseCluster,
) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = default_user_secret_name(&cluster.name_any());

    if kube.get_secret(&namespace, &name).await?.is_some() {
        return Ok(());
    }

    let secret = Credentials::generate().to_secret(cluster, &name);
    if kube.create_secret(&namespace, &secret).await? {
        info!(secret = %name, "created default user secret");
    } else {
        debug!(secret = %name, "default user secret created concurrently");
    }
    Ok(())
}

/// Create or update the internal credential secret
///
/// Writes only when the stored username or password differ from `creds`.
/// Returns the reference status should carry.
pub async fn reconcile_internal_secret(
    kube: &dyn KubeClient,
    cluster: &DatabaseCluster,
    creds: &Credentials,
) -> Result<LocalRef, Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = credential_secret_name(&cluster.name_any());
    let mut desired = creds.to_secret(cluster, &name);

    match kube.get_secret(&namespace, &name).await? {
        None => {
            if kube.create_secret(&namespace, &desired).await? {
                info!(secret = %name, "created credential secret");
            }
        }
        Some(existing) => {
            if Credentials::from_secret(&existing).as_ref() != Some(creds) {
                desired.metadata.resource_version = existing.metadata.resource_version;
                kube.replace_secret(&namespace, &desired).await?;
                info!(secret = %name, "updated credential secret");
            }
        }
    }

    Ok(LocalRef::new(name))
}

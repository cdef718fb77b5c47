//! Dispatch registration
//!
//! Wires one engine worker to the watch machinery: the primary DatabaseCluster
//! watch, every secondary source the provider declares, and the secrets the
//! engine itself creates.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::info;

use strata_common::crd::{DatabaseCluster, EngineKind};
use strata_common::{Error, MANAGED_BY_SELECTOR};

use crate::config::EngineConfig;
use crate::controller::{error_policy, reconcile, Context};
use crate::provider::WatchSource;
use crate::registry::ProviderRegistry;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config(label_selector: Option<&str>) -> WatcherConfig {
    let config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    match label_selector {
        Some(selector) => config.labels(selector),
        None => config,
    }
}

/// Build the controller future for one engine
///
/// Fails at startup when no provider is registered for `engine` or when the
/// provider cannot declare its watch sources. The returned future runs until
/// a shutdown signal is received.
pub fn build_controller(
    client: Client,
    registry: &ProviderRegistry,
    engine: EngineKind,
    config: EngineConfig,
) -> Result<Pin<Box<dyn Future<Output = ()> + Send>>, Error> {
    let provider = registry.get(engine)?;
    let sources: Vec<WatchSource> = provider.sources()?;
    let concurrency = config.concurrency;

    let ctx = Arc::new(
        Context::builder(client.clone(), provider)
            .config(config)
            .build(),
    );

    info!(%engine, sources = sources.len(), concurrency, "- DatabaseCluster controller");

    let clusters: Api<DatabaseCluster> = Api::all(client.clone());
    let mut controller = Controller::new(clusters, watcher_config(None))
        .owns(
            Api::<Secret>::all(client.clone()),
            watcher_config(Some(MANAGED_BY_SELECTOR)),
        )
        .with_config(ControllerConfig::default().concurrency(concurrency));

    for source in sources {
        info!(
            kind = %source.api_resource.kind,
            api_version = %source.api_resource.api_version,
            "watching provider source"
        );
        let api: Api<DynamicObject> = Api::all_with(client.clone(), &source.api_resource);
        controller = controller.owns_with(
            api,
            source.api_resource.clone(),
            watcher_config(source.label_selector.as_deref()),
        );
    }

    Ok(Box::pin(
        controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("DatabaseCluster")),
    ))
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

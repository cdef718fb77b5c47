//! Strata Operator - engine-agnostic DatabaseCluster reconciliation

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kube::{Client, CustomResourceExt};

use strata_clickhouse::ClickHouseProvider;
use strata_common::crd::{DatabaseCluster, DatabaseClusterDefinition, EngineKind};
use strata_common::kube_utils::apply_crds;
use strata_common::telemetry::{init_telemetry, TelemetryConfig};
use strata_engine::{build_controller, EngineConfig, ProviderRegistry, RestartPolicy, RetryPolicy};

/// Strata - declarative database clusters on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Emit JSON log lines
    #[arg(long, env = "STRATA_JSON_LOGS", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one engine worker (default mode)
    ///
    /// The worker reconciles every DatabaseCluster whose `spec.engine` matches
    /// `--engine` and ignores the rest, so one deployment per engine can share
    /// the same CRD.
    Controller(ControllerArgs),
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// Engine this worker owns
    #[arg(long, env = "STRATA_ENGINE", default_value = "clickhouse")]
    engine: EngineKind,

    /// Maximum clusters reconciled at once (0 = unbounded)
    #[arg(long, env = "STRATA_CONCURRENCY", default_value_t = 0)]
    concurrency: u16,

    /// Deadline for a single reconcile, in seconds
    #[arg(long, env = "STRATA_RECONCILE_TIMEOUT_SECS", default_value_t = 60)]
    reconcile_timeout_secs: u64,

    /// Requeue interval for Running clusters, in seconds
    #[arg(long, env = "STRATA_RESYNC_INTERVAL_SECS", default_value_t = 300)]
    resync_interval_secs: u64,

    /// Requeue interval for clusters not yet Running, in seconds
    #[arg(long, env = "STRATA_PENDING_INTERVAL_SECS", default_value_t = 15)]
    pending_interval_secs: u64,

    /// Poll interval while provider teardown runs, in seconds
    #[arg(long, env = "STRATA_DELETE_POLL_INTERVAL_SECS", default_value_t = 10)]
    delete_poll_interval_secs: u64,

    /// How restart annotations are honored (once-per-marker, disabled)
    #[arg(long, env = "STRATA_RESTART_POLICY", default_value = "once-per-marker")]
    restart_policy: RestartPolicy,

    /// Consecutive permanent failures before status shows Failed
    #[arg(long, env = "STRATA_FAILURE_THRESHOLD", default_value_t = 3)]
    failure_threshold: u32,

    /// Stop requeuing after this many consecutive failures (unbounded when unset)
    #[arg(long, env = "STRATA_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Install or update the Strata CRDs before starting
    #[arg(long, env = "STRATA_INSTALL_CRDS")]
    install_crds: bool,
}

impl ControllerArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .concurrency(self.concurrency)
            .reconcile_timeout(Duration::from_secs(self.reconcile_timeout_secs))
            .resync_interval(Duration::from_secs(self.resync_interval_secs))
            .pending_interval(Duration::from_secs(self.pending_interval_secs))
            .delete_poll_interval(Duration::from_secs(self.delete_poll_interval_secs))
            .restart_policy(self.restart_policy)
            .failure_threshold(self.failure_threshold)
            .retry(RetryPolicy {
                max_attempts: self.max_attempts,
                ..Default::default()
            })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "strata-operator".to_string(),
        json: cli.json_logs,
    })?;

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => ControllerArgs::from(ControllerCli::parse_from(["strata"])),
    };
    run_controller(args).await
}

/// Parser for the default mode, so env fallbacks still apply without a subcommand
#[derive(Parser, Debug)]
struct ControllerCli {
    #[command(flatten)]
    args: ControllerArgs,
}

impl From<ControllerCli> for ControllerArgs {
    fn from(cli: ControllerCli) -> Self {
        cli.args
    }
}

/// Both CRDs as a multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let cluster = serde_yaml::to_string(&DatabaseCluster::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize DatabaseCluster CRD: {}", e))?;
    let definition = serde_yaml::to_string(&DatabaseClusterDefinition::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize DatabaseClusterDefinition CRD: {}", e))?;
    Ok(format!("{cluster}---\n{definition}"))
}

fn provider_registry(client: &Client) -> anyhow::Result<ProviderRegistry> {
    Ok(ProviderRegistry::new().with(Arc::new(ClickHouseProvider::new(client.clone())))?)
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.install_crds {
        tracing::info!("Installing Strata CRDs...");
        apply_crds(
            &client,
            &[DatabaseCluster::crd(), DatabaseClusterDefinition::crd()],
        )
        .await?;
    }

    let registry = provider_registry(&client)?;
    let config = args.engine_config();
    tracing::info!(
        engine = %args.engine,
        registered = ?registry.engines(),
        restart_policy = ?config.restart_policy,
        "Starting Strata controller"
    );

    let controller = build_controller(client, &registry, args.engine, config)?;
    controller.await;

    tracing::info!("Strata controller shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_args_map_onto_engine_config() {
        let cli = Cli::try_parse_from([
            "strata",
            "controller",
            "--engine",
            "clickhouse",
            "--concurrency",
            "4",
            "--pending-interval-secs",
            "5",
            "--restart-policy",
            "disabled",
            "--failure-threshold",
            "0",
            "--max-attempts",
            "10",
        ])
        .unwrap();
        let Some(Commands::Controller(args)) = cli.command else {
            panic!("expected controller subcommand");
        };

        assert_eq!(args.engine, EngineKind::ClickHouse);
        let config = args.engine_config();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.pending_interval, Duration::from_secs(5));
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert_eq!(config.restart_policy, RestartPolicy::Disabled);
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.retry.max_attempts, Some(10));
    }

    #[test]
    fn unknown_engine_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["strata", "controller", "--engine", "oracle"]).is_err());
    }

    #[test]
    fn crd_manifests_contain_both_kinds() {
        let yaml = crd_manifests().unwrap();
        assert!(yaml.contains("databaseclusters.strata.dev"));
        assert!(yaml.contains("databaseclusterdefinitions.strata.dev"));
        assert!(yaml.contains("\n---\n"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
        ControllerCli::command().debug_assert();
    }
}

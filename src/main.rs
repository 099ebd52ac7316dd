//! Encryption Provider Operator - encryption-at-rest for workload clusters

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use encryption_provider_operator::controller::{
    error_policy, reconcile, Context, OperatorConfig,
};
use encryption_provider_operator::crd::Cluster;

/// Manages encryption provider configs so workload-cluster apiservers
/// encrypt Secret data in etcd, including periodic key rotation.
#[derive(Parser, Debug)]
#[command(name = "encryption-provider-operator", version, about, long_about = None)]
struct Cli {
    /// App catalog hosting the encryption-config-hasher chart
    #[arg(long, default_value = "default")]
    app_catalog: String,

    /// Container registry domain handed to the hasher chart values
    #[arg(long, default_value = "quay.io")]
    registry_domain: String,

    /// Days between automatic key rotations of a cluster
    #[arg(long, default_value = "180")]
    key_rotation_period_days: u64,

    /// Minimum release-version label for which clusters are reconciled
    #[arg(long, default_value = "17.0.0")]
    from_release_version: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    let settings = OperatorConfig {
        app_catalog: cli.app_catalog,
        registry_domain: cli.registry_domain,
        key_rotation_period: Duration::from_secs(cli.key_rotation_period_days * 24 * 60 * 60),
        from_release_version: cli.from_release_version,
    };
    tracing::info!(?settings, "encryption-provider-operator starting");

    let ctx = Arc::new(Context::new(client.clone(), settings));

    // Watch Cluster API clusters across all namespaces
    let clusters: Api<Cluster> = Api::all(client);

    Controller::new(clusters, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("encryption-provider-operator shutting down");
    Ok(())
}

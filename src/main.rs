//! kim operator - turns User records into ServiceAccounts and tokens

use clap::{Parser, Subcommand};
use kube::Client;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kim::controller::run_user_controller;
use kim::crd::{all_crds, ensure_crds_installed};

/// kim - Kubernetes identity manager
#[derive(Parser, Debug)]
#[command(name = "kim", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches User resources and converges each user's ServiceAccount and
    /// token Secret to the user's state.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug, Default)]
struct ControllerArgs {
    /// Only watch Users in this namespace (all namespaces when unset)
    #[arg(long, env = "KIM_NAMESPACE")]
    namespace: Option<String>,

    /// Do not install or update CRDs on startup
    #[arg(long, env = "KIM_SKIP_CRD_INSTALL")]
    skip_crd_install: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::default()).await,
    }
}

/// Run in controller mode
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.skip_crd_install {
        info!("skipping CRD installation");
    } else {
        ensure_crds_installed(&client)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRDs: {}", e))?;
    }

    run_user_controller(client, args.namespace.as_deref()).await;

    info!("shutting down");
    Ok(())
}

use std::sync::Arc;

use clap::Parser;
use svclb::proxier::Proxier;
use svclb::shim::ipset::IpsetCmd;
use svclb::shim::ipvs::IpvsAdm;
use svclb::shim::link::LinkAddrCtl;
use svclb::shim::NoopBackend;
use svclb::{setup, Reconciler};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod replay;
mod stress;

use config::{Cli, Commands, DataPlaneArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_subscriber();
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    let handle = match cli.command {
        Commands::Replay(args) => {
            let reconciler = Arc::new(build_reconciler(&args.data_plane)?);
            tokio::spawn(replay::run(reconciler, args, cancel.clone()))
        }
        Commands::Stress(args) => {
            let reconciler = Arc::new(build_reconciler(&args.data_plane)?);
            tokio::spawn(stress::run(reconciler, args, cancel.clone()))
        }
    };
    run_until_shutdown(handle, cancel).await
}

fn build_reconciler(args: &DataPlaneArgs) -> anyhow::Result<Reconciler> {
    let proxier = if args.dry_run {
        info!("dry run: applying against no-op backends, kernel untouched");
        Proxier::new(
            Box::new(NoopBackend),
            Box::new(NoopBackend),
            Box::new(NoopBackend),
            args.node_ips.clone(),
        )
    } else {
        setup::initialize(&args.dummy_interface)?;
        let node_ips = if args.node_ips.is_empty() {
            setup::detect_node_ips(&args.dummy_interface)?
        } else {
            args.node_ips.clone()
        };
        info!("fronting node ports on {node_ips:?}");

        let mut proxier = Proxier::new(
            Box::new(IpvsAdm),
            Box::new(IpsetCmd),
            Box::new(LinkAddrCtl::new(args.dummy_interface.clone())),
            node_ips,
        );
        proxier.ensure_sets()?;
        setup::install_nat_rules()?;
        proxier
    };
    Ok(Reconciler::new(proxier))
}

async fn run_until_shutdown(
    mut handle: JoinHandle<anyhow::Result<()>>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    tokio::select! {
        res = &mut handle => res?,
        _ = shutdown_signal() => {
            cancel.cancel();
            let res = handle.await?;
            info!("Exiting...");
            res
        }
    }
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "svclb=info,svclb_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
            info!("captured ctrl_c signal");
        },
        _ = terminate => {},
    }
}

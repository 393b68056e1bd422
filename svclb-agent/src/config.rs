use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply JSON snapshot files as full-state callbacks, in order
    Replay(ReplayArgs),
    /// Drive randomized full-state callbacks through the pipeline
    Stress(StressArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DataPlaneArgs {
    /// Dummy interface holding service addresses
    #[arg(
        long,
        env = "SVCLB_DUMMY_INTERFACE",
        default_value = svclb::setup::DEFAULT_DUMMY_INTERFACE
    )]
    pub dummy_interface: String,

    /// Node addresses fronting node-port services; auto-detected when empty
    #[arg(long = "node-ip", env = "SVCLB_NODE_IPS", value_delimiter = ',')]
    pub node_ips: Vec<IpAddr>,

    /// Apply against no-op backends and leave the kernel untouched
    #[arg(long)]
    pub dry_run: bool,

    /// Capacity of the snapshot intake channel
    #[arg(long, default_value_t = 100)]
    pub channel_capacity: usize,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub data_plane: DataPlaneArgs,

    /// Snapshot files, each holding one complete desired state
    #[arg(required = true)]
    pub snapshots: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StressArgs {
    #[command(flatten)]
    pub data_plane: DataPlaneArgs,

    /// Number of full-state callbacks to run
    #[arg(long, default_value_t = 100)]
    pub callbacks: usize,

    /// Simulated cluster size; one in this many endpoints lands locally
    #[arg(long, default_value_t = 20)]
    pub nodes: usize,

    #[arg(long, default_value_t = 10)]
    pub min_services: usize,

    #[arg(long, default_value_t = 300)]
    pub max_services: usize,

    #[arg(long, default_value_t = 10)]
    pub min_endpoints: usize,

    #[arg(long, default_value_t = 300)]
    pub max_endpoints: usize,

    /// Base RNG seed; callback i reseeds with seed + i so runs repeat
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

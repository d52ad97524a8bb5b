//! shardpoold — the autoscaler daemon.
//!
//! Autoscales a managed instance group backing a stateful shard
//! cluster. Before any scale-down, the victim node is drained: it is
//! excluded from shard allocation and the controller waits, under a
//! bounded deadline, until it holds no data. Only then is the VM
//! deleted.
//!
//! # Usage
//!
//! ```text
//! shardpoold run --config shardpool.toml
//! shardpoold check-config --config shardpool.toml
//! shardpoold rebalance --config shardpool.toml
//! ```
//!
//! Deployment constraint: at most one shardpoold instance may manage
//! a given group. Two controllers against the same group is undefined
//! behavior.

mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use shardpool_config::Config;

#[derive(Parser)]
#[command(name = "shardpoold", about = "Autoscaler for VM pools backing stateful shard clusters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scaling control loop until the process exits.
    Run {
        /// Path to the TOML config file.
        #[arg(long, default_value = "shardpool.toml")]
        config: PathBuf,
    },
    /// Parse and validate the config file, then exit.
    CheckConfig {
        #[arg(long, default_value = "shardpool.toml")]
        config: PathBuf,
    },
    /// Run a single shard rebalance pass, then exit.
    Rebalance {
        #[arg(long, default_value = "shardpool.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shardpool=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let config = Config::load(&config)?;
            run::run(config).await
        }
        Command::CheckConfig { config } => {
            let config = Config::load(&config)?;
            // Surfaces window warnings for malformed overrides.
            let overrides = shardpool_policy::build_overrides(&config.autoscaler);
            info!(
                group = %config.infrastructure.gcp.group_name,
                overrides = overrides.len(),
                "config OK"
            );
            Ok(())
        }
        Command::Rebalance { config } => {
            let config = Config::load(&config)?;
            run::rebalance_once(config).await
        }
    }
}

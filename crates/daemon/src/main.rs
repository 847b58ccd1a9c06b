// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::{Args, Parser, Subcommand};
use tracing::error;

use p2pd_daemon::config::Config;
use p2pd_daemon::lifecycle::{self, DAEMON_VERSION};

#[derive(Parser)]
#[command(name = "p2pd", version = DAEMON_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Daemon lifecycle operations.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon. This is the command a self-upgrade handoff
    /// re-invokes this same binary with.
    Start(DaemonStartArgs),
}

#[derive(Args)]
struct DaemonStartArgs {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Command::Daemon { action } = cli.command;
    let DaemonAction::Start(args) = action;

    if let Err(err) = args.config.validate() {
        error!("invalid configuration: {err}");
        std::process::exit(1);
    }

    if let Err(err) = lifecycle::run(args.config).await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}

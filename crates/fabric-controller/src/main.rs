//! Fabric Controller: entry point.
//!
//! Subcommands: init, run, show-config.

mod commands;
mod config;
mod controller;
mod logging;

use clap::{Parser, Subcommand};

/// Fabric overlay network controller.
#[derive(Parser, Debug)]
#[command(name = "fabric-controller", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file.
    Init(commands::init::InitArgs),
    /// Start the controller.
    Run(commands::run::RunArgs),
    /// Print the effective configuration.
    ShowConfig(commands::show_config::ShowConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init(args) => commands::init::run(args),
        Commands::Run(args) => commands::run::run(args).await,
        Commands::ShowConfig(args) => commands::show_config::run(args),
    }
}

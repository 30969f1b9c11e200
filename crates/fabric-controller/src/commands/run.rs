//! `fabric-controller run`: start the controller.

use clap::Args;
use std::path::PathBuf;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::logging;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the config file.
    #[arg(short, long, default_value = "fabric.toml")]
    pub config: PathBuf,

    /// Override the log level.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Round-trip local commands through their replication envelope.
    #[arg(long)]
    pub encode_decode: bool,
}

pub async fn run(args: &RunArgs) -> anyhow::Result<()> {
    let mut config = ControllerConfig::load(&args.config)?;
    if let Some(ref level) = args.log_level {
        config.logging.level = level.clone();
    }
    if args.encode_decode {
        config.network.encode_decode_commands = true;
    }
    logging::init(&config.logging)?;

    tracing::info!(
        config = %args.config.display(),
        "Fabric controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let controller = Controller::new(config)?;
    controller
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("received shutdown signal"),
                Err(err) => tracing::error!(error = %err, "failed to listen for shutdown signal"),
            }
        })
        .await?;

    tracing::info!("Fabric controller exited cleanly");
    Ok(())
}

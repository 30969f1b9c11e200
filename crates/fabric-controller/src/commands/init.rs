//! `fabric-controller init`: write a default configuration file.

use clap::Args;
use std::path::PathBuf;

use crate::config::ControllerConfig;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path of the config file to create.
    #[arg(short, long, default_value = "fabric.toml")]
    pub config: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: &InitArgs) -> anyhow::Result<()> {
    if args.config.exists() && !args.force {
        anyhow::bail!(
            "configuration file already exists at {}",
            args.config.display()
        );
    }

    ControllerConfig::default().save(&args.config)?;
    println!("Wrote default configuration to {}", args.config.display());
    println!(
        "Run 'fabric-controller run --config {}' to start the controller.",
        args.config.display()
    );
    Ok(())
}

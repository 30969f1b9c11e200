//! `fabric-controller show-config`: print the effective configuration.

use clap::Args;
use std::path::PathBuf;

use crate::config::ControllerConfig;

#[derive(Args, Debug)]
pub struct ShowConfigArgs {
    /// Path to the config file.
    #[arg(short, long, default_value = "fabric.toml")]
    pub config: PathBuf,

    /// Print as JSON instead of TOML.
    #[arg(long)]
    pub json: bool,
}

pub fn render(config: &ControllerConfig, json: bool) -> anyhow::Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(config)?)
    } else {
        Ok(toml::to_string_pretty(config)?)
    }
}

pub fn run(args: &ShowConfigArgs) -> anyhow::Result<()> {
    let config = ControllerConfig::load(&args.config)?;
    println!("{}", render(&config, args.json)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_formats() {
        let config = ControllerConfig::default();

        let json: serde_json::Value =
            serde_json::from_str(&render(&config, true).unwrap()).unwrap();
        assert_eq!(json["network"]["min_router_cost"], 10);
        assert_eq!(json["logging"]["format"], "text");

        let toml_str = render(&config, false).unwrap();
        assert!(toml_str.contains("[commands.rate_limiter]"));
    }
}

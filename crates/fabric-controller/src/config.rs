//! Controller configuration loading and management.

use std::path::Path;
use std::time::Duration;

use fabric_command::RateLimiterConfig;
use fabric_core::NetworkOptions;
use serde::{Deserialize, Serialize};

/// Full configuration for the controller.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ControllerConfig {
    /// Topology, routing and validation tunables.
    #[serde(default)]
    pub network: NetworkOptions,

    /// Command dispatch settings.
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CommandsConfig {
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ControllerConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ControllerConfig = toml::from_str(&contents)?;
            config.network.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        self.network.cycle_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.commands.rate_limiter.enabled);
        assert_eq!(config.commands.rate_limiter.queue_size, 100);
        assert_eq!(config.cycle_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = ControllerConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let decoded: ControllerConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let config = ControllerConfig::load(Path::new("/nonexistent/fabric.toml")).unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_config_from_toml_partial() {
        let toml_str = r#"
[network]
min_router_cost = 25
validation_batch_size = 10

[commands.rate_limiter]
queue_size = 5

[logging]
format = "json"
"#;
        let config: ControllerConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.network.min_router_cost, 25);
        assert_eq!(config.network.validation_batch_size, 10);
        assert_eq!(config.commands.rate_limiter.queue_size, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
        // Defaults for unspecified
        assert_eq!(config.network.pending_link_timeout, Duration::from_secs(10));
        assert!(config.commands.rate_limiter.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("fabric-config-{}", std::process::id()));
        let path = dir.join("fabric.toml");
        let mut config = ControllerConfig::default();
        config.network.encode_decode_commands = true;
        config.logging.level = "debug".into();

        config.save(&path).unwrap();
        assert_eq!(ControllerConfig::load(&path).unwrap(), config);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_rejects_invalid_network_options() {
        let dir = std::env::temp_dir().join(format!("fabric-config-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fabric.toml");
        std::fs::write(&path, "[network]\nvalidation_batch_size = 0\n").unwrap();

        assert!(ControllerConfig::load(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

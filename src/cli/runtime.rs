use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use omnidocs_bridge::config::default_config_path;
use omnidocs_bridge::BridgeConfig;
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    // stdout carries command output; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

pub struct LoadedConfig {
    pub config: BridgeConfig,
    /// File the configuration was (or would have been) read from.
    pub path: Option<PathBuf>,
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let path = match config_path {
        Some(path) => {
            if !fs::try_exists(path).await.unwrap_or(false) {
                bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        }
        // Priority: ./config/omnidocs.yaml > ~/.config/omnidocs-bridge/config.yaml
        None => default_config_path(),
    };

    let mut config = match &path {
        Some(path) if fs::try_exists(path).await.unwrap_or(false) => {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config = BridgeConfig::from_yaml_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        Some(path) => {
            warn!("Config file not found, using defaults: {}", path.display());
            BridgeConfig::default()
        }
        None => BridgeConfig::default(),
    };

    let applied = config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    for key in applied {
        info!("Applied environment override {}", key);
    }
    config.validate().context("Invalid configuration")?;

    Ok(LoadedConfig { config, path })
}

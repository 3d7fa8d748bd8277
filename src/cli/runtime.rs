use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::fs;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DevpipeConfig;

const LOCAL_CONFIG: &str = "config/devpipe.yaml";

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

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
    pub config: DevpipeConfig,
    pub path: Option<PathBuf>,
}

/// Files searched when `--config` is absent, in priority order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(mut dir) = dirs::config_dir() {
        dir.push("devpipe");
        dir.push("config.yaml");
        paths.push(dir);
    }
    paths
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    if let Some(path) = config_path {
        if !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        return read_config(path).await;
    }

    for candidate in default_config_paths() {
        if candidate.exists() {
            return read_config(&candidate).await;
        }
    }

    debug!("No config file found, using defaults");
    Ok(LoadedConfig {
        config: DevpipeConfig::default(),
        path: None,
    })
}

async fn read_config(path: &Path) -> Result<LoadedConfig> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = DevpipeConfig::from_yaml(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    info!("Loaded configuration from: {}", path.display());
    Ok(LoadedConfig {
        config,
        path: Some(path.to_path_buf()),
    })
}

use std::path::{Path, PathBuf};

use crate::config::DevpipeConfig;

pub struct CliContext {
    config: DevpipeConfig,
    config_path: Option<PathBuf>,
}

impl CliContext {
    pub fn new(config: DevpipeConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn config(&self) -> &DevpipeConfig {
        &self.config
    }

    /// The file the configuration was read from, if any.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

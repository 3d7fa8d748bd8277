use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where capture logs land.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogCfg {
    /// Directory used when no prefix is given.
    pub root: PathBuf,
    pub extension: String,
    /// `strftime` pattern for the file stem.
    pub stamp_format: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        let root = dirs::home_dir()
            .map(|home| home.join("Documents").join("dev_utils_logs"))
            .unwrap_or_else(|| PathBuf::from("./dev_utils_logs"));
        Self {
            root,
            extension: "jsonl".into(),
            stamp_format: "%Y%m%d_%H%M%S".into(),
        }
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether click limits apply across all tabs or per tab.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickScope {
    #[default]
    Global,
    PerSession,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rate_limit_count: usize,
    pub rate_limit_window_ms: u64,
    pub micro_debounce_ms: u64,
    pub click_scope: ClickScope,
    /// Console prefix the click scanner writes before its JSON payload.
    pub click_marker: String,
}

impl PipelineConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn micro_debounce(&self) -> Duration {
        Duration::from_millis(self.micro_debounce_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit_count: 3,
            rate_limit_window_ms: 1000,
            micro_debounce_ms: 200,
            click_scope: ClickScope::Global,
            click_marker: "__UI_SCANNER_DATA__".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parses_snake_case() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"click_scope": "per_session"}"#).unwrap();
        assert_eq!(cfg.click_scope, ClickScope::PerSession);
        assert_eq!(cfg.rate_limit_count, 3);
        assert_eq!(cfg.micro_debounce(), Duration::from_millis(200));
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Tab discovery and per-tab listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Track every tab and follow new ones. Off: exactly one tab is tracked.
    pub multi_tab: bool,
    /// Wait after a main-frame navigation before re-injecting the click scanner.
    pub navigation_settle_ms: u64,
    /// Wait after a new tab appears before attaching to it.
    pub new_tab_settle_ms: u64,
    /// URL schemes of internal pages that must not receive injected scripts.
    pub privileged_schemes: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            multi_tab: false,
            navigation_settle_ms: 500,
            new_tab_settle_ms: 1_000,
            privileged_schemes: [
                "chrome",
                "chrome-extension",
                "chrome-untrusted",
                "chrome-search",
                "devtools",
                "edge",
                "brave",
                "about",
                "view-source",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl TrackerConfig {
    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }

    pub fn new_tab_settle(&self) -> Duration {
        Duration::from_millis(self.new_tab_settle_ms)
    }

    /// Internal browser pages forbid (or break under) script injection.
    ///
    /// An empty URL is a tab that has not committed anything yet and counts as privileged.
    pub fn is_privileged(&self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() {
            return true;
        }
        match Url::parse(url) {
            Ok(parsed) => self
                .privileged_schemes
                .iter()
                .any(|scheme| scheme.eq_ignore_ascii_case(parsed.scheme())),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_pages_are_privileged() {
        let cfg = TrackerConfig::default();
        for url in [
            "chrome://newtab/",
            "chrome-extension://abc/popup.html",
            "devtools://devtools/bundled/inspector.html",
            "about:blank",
            "",
        ] {
            assert!(cfg.is_privileged(url), "{url}");
        }
    }

    #[test]
    fn web_pages_are_not_privileged() {
        let cfg = TrackerConfig::default();
        for url in [
            "https://x.test/",
            "http://localhost:3000/app",
            "file:///tmp/index.html",
            "data:text/html,<p>hi</p>",
        ] {
            assert!(!cfg.is_privileged(url), "{url}");
        }
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: TrackerConfig = serde_json::from_str(r#"{"multi_tab": true}"#).unwrap();
        assert!(cfg.multi_tab);
        assert_eq!(cfg.navigation_settle(), Duration::from_millis(500));
        assert_eq!(cfg.new_tab_settle(), Duration::from_secs(1));
    }
}

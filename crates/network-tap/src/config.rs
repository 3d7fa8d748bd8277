//! Configuration types for the network tap.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Quiet period after the last resource addition before a bundle flushes.
    pub bundle_window_ms: u64,
    pub max_value_length: usize,
    pub max_url_length: usize,
    pub max_container_entries: usize,
    pub max_important_headers: usize,
    pub max_stack_frames: usize,
    /// Resource types (as reported by the browser) that are bundled instead of diffed.
    pub bundled_types: Vec<String>,
    /// Diff paths dropped as noise. An entry matches its own path and everything below it.
    pub diff_deny_list: Vec<String>,
    /// Header names, lowercase, in priority order.
    pub important_headers: Vec<String>,
    pub reference_warn_threshold: usize,
}

impl TapConfig {
    pub fn bundle_window(&self) -> Duration {
        Duration::from_millis(self.bundle_window_ms)
    }

    pub fn is_bundled(&self, resource_type: &str) -> bool {
        self.bundled_types
            .iter()
            .any(|kind| kind.eq_ignore_ascii_case(resource_type))
    }
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            bundle_window_ms: 1000,
            max_value_length: 128,
            max_url_length: 200,
            max_container_entries: 5,
            max_important_headers: 3,
            max_stack_frames: 3,
            bundled_types: vec![
                "Stylesheet".into(),
                "Script".into(),
                "Image".into(),
                "Font".into(),
                "Media".into(),
                "Manifest".into(),
                "Other".into(),
            ],
            diff_deny_list: vec![
                "initiator.stack".into(),
                "post_data".into(),
                "timestamp".into(),
                "wall_time".into(),
            ],
            important_headers: vec![
                "content-type".into(),
                "accept".into(),
                "referer".into(),
                "origin".into(),
                "user-agent".into(),
                "x-requested-with".into(),
            ],
            reference_warn_threshold: 50_000,
        }
    }
}

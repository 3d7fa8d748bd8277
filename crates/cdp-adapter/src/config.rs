use serde::{Deserialize, Serialize};

/// Where the already-running browser listens and how patient the adapter is with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    pub host: String,
    pub port: u16,
    /// Pinned DevTools websocket. When unset it is read from `/json/version` on every connect.
    pub websocket_url: Option<String>,
    pub default_deadline_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9222,
            websocket_url: None,
            default_deadline_ms: 10_000,
            heartbeat_interval_ms: 15_000,
            probe_timeout_ms: 3_000,
        }
    }
}

impl CdpConfig {
    pub fn http_endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

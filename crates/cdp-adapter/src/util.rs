use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use url::Url;

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};

/// Response of the DevTools `/json/version` endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub websocket_url: String,
}

/// Check that a browser with remote debugging listens on the configured port and read its
/// websocket url.
pub async fn probe_browser(cfg: &CdpConfig) -> Result<BrowserVersion, AdapterError> {
    let endpoint = version_url(cfg)?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(cfg.probe_timeout_ms))
        .build()
        .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))?;

    let response = client.get(endpoint.clone()).send().await.map_err(|err| {
        let hint = if err.is_connect() {
            format!("connection refused on {}:{}", cfg.host, cfg.port)
        } else if err.is_timeout() {
            format!("no answer from {} within {}ms", endpoint, cfg.probe_timeout_ms)
        } else {
            err.to_string()
        };
        AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true)
            .with_data(json!({
                "endpoint": endpoint.as_str(),
                "tip": "start the browser with --remote-debugging-port=<port>",
            }))
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("{} answered HTTP {}", endpoint, status.as_u16()))
            .with_data(json!({
                "endpoint": endpoint.as_str(),
                "tip": "is something other than the browser listening on this port?",
            })));
    }

    let version: BrowserVersion = response.json().await.map_err(|err| {
        AdapterError::new(AdapterErrorKind::Decode)
            .with_hint(format!("unexpected /json/version payload: {err}"))
    })?;
    info!(target: "cdp-adapter", browser = %version.browser, "located browser");
    Ok(version)
}

fn version_url(cfg: &CdpConfig) -> Result<Url, AdapterError> {
    Url::parse(&cfg.http_endpoint())
        .and_then(|base| base.join("/json/version"))
        .map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("invalid debugger address {}: {err}", cfg.http_endpoint()))
        })
}

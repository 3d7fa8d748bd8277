//! Checks against a real browser started with `--remote-debugging-port`.
//!
//! Run with:
//! ```bash
//! export DEVPIPE_CDP_LIVE=1          # opt in
//! export DEVPIPE_CDP_PORT=9222       # optional
//! cargo test -p cdp-adapter --test live_browser -- --nocapture
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{event_bus, probe_browser, CdpAdapter, CdpConfig, PageDriver, RawEvent};
use tokio::time::timeout;

fn live_enabled() -> bool {
    env::var("DEVPIPE_CDP_LIVE")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn live_config() -> CdpConfig {
    let mut cfg = CdpConfig::default();
    if let Some(port) = env::var("DEVPIPE_CDP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        cfg.port = port;
    }
    cfg
}

#[tokio::test]
async fn probe_reports_websocket_url() {
    if !live_enabled() {
        eprintln!("skipping live browser test (DEVPIPE_CDP_LIVE not set)");
        return;
    }
    let version = probe_browser(&live_config()).await.expect("browser reachable");
    assert!(version.websocket_url.starts_with("ws"));
}

#[tokio::test]
async fn attached_page_reports_navigation() {
    if !live_enabled() {
        eprintln!("skipping live browser test (DEVPIPE_CDP_LIVE not set)");
        return;
    }

    let (bus, mut rx) = event_bus();
    let adapter = Arc::new(CdpAdapter::new(live_config(), bus));
    Arc::clone(&adapter).start().await.expect("adapter start");

    let target = adapter.create_page("about:blank").await.expect("create page");
    let session = adapter.attach(&target).await.expect("attach");
    adapter.enable_domains(&session).await.expect("enable domains");
    adapter
        .evaluate(&session, "location.href = 'data:text/html,<p>devpipe</p>'")
        .await
        .expect("evaluate");

    let navigated = timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            if let RawEvent::FrameNavigated { cdp_session, .. } = event {
                if cdp_session == session {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(navigated, "expected a frame navigation on the attached page");

    adapter.shutdown().await;
}

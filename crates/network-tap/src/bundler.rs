//! Debounced grouping of low-signal resource fetches.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use devpipe_core_types::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::TapConfig;
use crate::truncate::simplify_url;

/// Grouped resource record for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceBundle {
    pub session_id: SessionId,
    pub resources: BTreeMap<String, Vec<String>>,
}

impl ResourceBundle {
    pub fn total(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    pub fn to_data(&self) -> Value {
        serde_json::json!({
            "session_id": self.session_id,
            "count": self.total(),
            "resources": self.resources,
        })
    }
}

/// Pluralised bundle key for a browser resource type.
pub fn bundle_key(resource_type: &str) -> &'static str {
    match resource_type.to_ascii_lowercase().as_str() {
        "stylesheet" => "stylesheets",
        "script" => "scripts",
        "image" => "images",
        "font" => "fonts",
        "media" => "media",
        "manifest" => "manifests",
        _ => "others",
    }
}

#[derive(Default)]
struct PendingBundle {
    resources: BTreeMap<String, Vec<String>>,
    timer: Option<CancellationToken>,
}

/// Accumulates resources per session and flushes each session's bundle after a quiet window.
///
/// All mutation happens under one async mutex. A timer that wakes up after being superseded sees
/// its token cancelled while holding that mutex and leaves the bundle alone.
pub struct ResourceBundler {
    window: Duration,
    max_url_length: usize,
    pending: Mutex<HashMap<SessionId, PendingBundle>>,
    flushed: mpsc::UnboundedSender<ResourceBundle>,
}

impl ResourceBundler {
    /// Returns the bundler and the receiver of timer-driven flushes.
    pub fn new(config: &TapConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<ResourceBundle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bundler = Arc::new(Self {
            window: config.bundle_window(),
            max_url_length: config.max_url_length,
            pending: Mutex::new(HashMap::new()),
            flushed: tx,
        });
        (bundler, rx)
    }

    pub async fn add(self: &Arc<Self>, session: &SessionId, resource_type: &str, url: &str) {
        let token = CancellationToken::new();
        {
            let mut pending = self.pending.lock().await;
            let bundle = pending.entry(session.clone()).or_default();
            bundle
                .resources
                .entry(bundle_key(resource_type).to_string())
                .or_default()
                .push(simplify_url(url, self.max_url_length));
            if let Some(previous) = bundle.timer.replace(token.clone()) {
                previous.cancel();
            }
        }
        trace!(target: "network-tap", session = %session, resource_type, "resource bundled");

        let bundler = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(bundler.window) => {
                    bundler.flush_if_current(&session, &token).await;
                }
            }
        });
    }

    async fn flush_if_current(&self, session: &SessionId, token: &CancellationToken) {
        let bundle = {
            let mut pending = self.pending.lock().await;
            if token.is_cancelled() {
                return;
            }
            take(&mut pending, session)
        };
        if let Some(bundle) = bundle {
            debug!(
                target: "network-tap",
                session = %session,
                count = bundle.total(),
                "bundle flushed after quiet window"
            );
            let _ = self.flushed.send(bundle);
        }
    }

    /// Flush one session now. Returns `None` when nothing is pending.
    pub async fn flush(&self, session: &SessionId) -> Option<ResourceBundle> {
        let mut pending = self.pending.lock().await;
        take(&mut pending, session)
    }

    /// Flush every session, ordered by session id.
    pub async fn flush_all(&self) -> Vec<ResourceBundle> {
        let mut pending = self.pending.lock().await;
        let mut sessions: Vec<SessionId> = pending.keys().cloned().collect();
        sessions.sort();
        sessions
            .iter()
            .filter_map(|session| take(&mut pending, session))
            .collect()
    }

    pub async fn pending_sessions(&self) -> usize {
        self.pending.lock().await.len()
    }
}

fn take(
    pending: &mut HashMap<SessionId, PendingBundle>,
    session: &SessionId,
) -> Option<ResourceBundle> {
    let bundle = pending.remove(session)?;
    if let Some(timer) = bundle.timer {
        timer.cancel();
    }
    if bundle.resources.is_empty() {
        return None;
    }
    Some(ResourceBundle {
        session_id: session.clone(),
        resources: bundle.resources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_pluralised() {
        assert_eq!(bundle_key("Stylesheet"), "stylesheets");
        assert_eq!(bundle_key("Media"), "media");
        assert_eq!(bundle_key("Ping"), "others");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_flush_cancels_timer() {
        let (bundler, mut rx) = ResourceBundler::new(&TapConfig::default());
        let session = SessionId::tab(0);
        bundler.add(&session, "Image", "https://x.test/a.png").await;

        let bundle = bundler.flush(&session).await.expect("pending bundle");
        assert_eq!(bundle.resources["images"], vec!["https://x.test/a.png"]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
        assert!(bundler.flush(&session).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_flush_independently() {
        let (bundler, mut rx) = ResourceBundler::new(&TapConfig::default());
        bundler.add(&SessionId::tab(0), "Script", "https://x.test/a.js").await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        bundler.add(&SessionId::tab(1), "Font", "https://x.test/a.woff").await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        let first = rx.recv().await.expect("tab-0 flushed");
        assert_eq!(first.session_id, SessionId::tab(0));
        assert!(rx.try_recv().is_err());

        let second = rx.recv().await.expect("tab-1 flushed");
        assert_eq!(second.session_id, SessionId::tab(1));
    }
}

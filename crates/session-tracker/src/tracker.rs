use std::sync::Arc;

use cdp_adapter::{ConsoleCall, NetworkRequest, PageDriver};
use devpipe_core_types::{ConsoleMessage, FrameNavigated, SessionId};
use event_pipeline::{LifecycleEvent, PipelineConfig, PipelineInputs};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::TrackerConfig;
use crate::errors::TrackerError;
use crate::inject::click_scanner_script;
use crate::model::{TrackerSnapshot, TrackerState};

/// Everything trackers share: the browser, the pipeline inputs and the injection settings.
pub struct TrackerContext {
    pub(crate) driver: Arc<dyn PageDriver>,
    pub(crate) config: TrackerConfig,
    pub(crate) inputs: PipelineInputs,
    marker: String,
    script: String,
}

impl TrackerContext {
    pub fn new(driver: Arc<dyn PageDriver>, config: TrackerConfig, inputs: PipelineInputs) -> Self {
        let marker = PipelineConfig::default().click_marker;
        let script = click_scanner_script(&marker);
        Self {
            driver,
            config,
            inputs,
            marker,
            script,
        }
    }

    /// Console prefix the injected scanner logs with and the trackers look for.
    pub fn with_click_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self.script = click_scanner_script(&self.marker);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn click_marker(&self) -> &str {
        &self.marker
    }
}

struct TrackerInner {
    state: TrackerState,
    url: String,
    main_frame_id: String,
    pending_injection: Option<CancellationToken>,
}

/// Listener state for one tab, bound to one flattened CDP session.
pub struct SessionTracker {
    id: SessionId,
    target_id: String,
    cdp_session: String,
    ctx: Arc<TrackerContext>,
    inner: Mutex<TrackerInner>,
    cancel: CancellationToken,
}

impl SessionTracker {
    pub fn new(
        id: SessionId,
        target_id: impl Into<String>,
        cdp_session: impl Into<String>,
        ctx: Arc<TrackerContext>,
        cancel: CancellationToken,
    ) -> Self {
        let target_id = target_id.into();
        Self {
            id,
            // the main frame of a page target shares the target's id
            inner: Mutex::new(TrackerInner {
                state: TrackerState::Unattached,
                url: String::new(),
                main_frame_id: target_id.clone(),
                pending_injection: None,
            }),
            target_id,
            cdp_session: cdp_session.into(),
            ctx,
            cancel,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn cdp_session(&self) -> &str {
        &self.cdp_session
    }

    pub fn state(&self) -> TrackerState {
        self.inner.lock().state
    }

    pub fn url(&self) -> String {
        self.inner.lock().url.clone()
    }

    pub fn main_frame_id(&self) -> String {
        self.inner.lock().main_frame_id.clone()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let inner = self.inner.lock();
        TrackerSnapshot {
            session_id: self.id.to_string(),
            target_id: self.target_id.clone(),
            url: inner.url.clone(),
            state: inner.state,
        }
    }

    /// Enable event delivery for the tab and inject the click scanner unless the tab shows a
    /// privileged page. On error the tracker stays `Unattached`.
    pub async fn attach(&self, url: &str) -> Result<TrackerState, TrackerError> {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return Err(TrackerError::Detached(self.id.clone()));
            }
            inner.url = url.to_string();
        }

        self.ctx.driver.enable_domains(&self.cdp_session).await?;

        if self.ctx.config.is_privileged(url) {
            let state = self.block();
            info!(target: "session-tracker", session = %self.id, url, "privileged page; scanner not injected");
            return Ok(state);
        }
        self.inject().await
    }

    /// React to a committed frame navigation. Returns `false` when the event was ignored
    /// (child frame or detached tracker).
    pub fn handle_navigation(self: &Arc<Self>, nav: &FrameNavigated) -> bool {
        if !nav.is_top_level() {
            trace!(target: "session-tracker", session = %self.id, frame = %nav.frame_id, "child frame navigation ignored");
            return false;
        }

        let privileged = self.ctx.config.is_privileged(&nav.url);
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.url = nav.url.clone();
            inner.main_frame_id = nav.frame_id.clone();
            if let Some(pending) = inner.pending_injection.take() {
                pending.cancel();
            }
            if privileged {
                inner.state = TrackerState::Blocked;
            } else {
                // the new document has no scanner until the settle task re-injects it
                inner.state = TrackerState::Unattached;
                let token = self.cancel.child_token();
                inner.pending_injection = Some(token.clone());
                self.schedule_injection(token);
            }
        }

        debug!(target: "session-tracker", session = %self.id, url = %nav.url, privileged, "main frame navigated");
        let event = LifecycleEvent::Navigated {
            session_id: self.id.clone(),
            url: nav.url.clone(),
        };
        if self.ctx.inputs.lifecycle.send(event).is_err() {
            debug!(target: "session-tracker", session = %self.id, "pipeline closed; navigation not recorded");
        }
        true
    }

    /// Forward a network request to the pipeline. Returns whether it was forwarded.
    pub fn on_request(&self, request: NetworkRequest) -> bool {
        if !self.state().forwards_events() {
            return false;
        }
        self.ctx
            .inputs
            .requests
            .send(request.into_request_sent(self.id.clone()))
            .is_ok()
    }

    /// Forward a console call carrying the click marker. Other console output is ignored.
    pub fn on_console(&self, call: &ConsoleCall) -> bool {
        if !self.state().forwards_events() {
            return false;
        }
        let Some(json_payload) = call.marked_payload(&self.ctx.marker) else {
            return false;
        };
        let message = ConsoleMessage {
            session_id: self.id.clone(),
            marker_prefix: self.ctx.marker.clone(),
            json_payload,
        };
        self.ctx.inputs.console.send(message).is_ok()
    }

    /// Stop all activity for this tab. The browser side is left alone.
    pub fn teardown(&self) {
        let mut inner = self.inner.lock();
        inner.state = TrackerState::Detached;
        if let Some(pending) = inner.pending_injection.take() {
            pending.cancel();
        }
        self.cancel.cancel();
    }

    /// Tear down and release the CDP session.
    pub async fn detach(&self) -> Result<(), TrackerError> {
        self.teardown();
        self.ctx.driver.detach(&self.cdp_session).await?;
        Ok(())
    }

    fn schedule_injection(self: &Arc<Self>, token: CancellationToken) {
        let tracker = Arc::clone(self);
        let settle = self.ctx.config.navigation_settle();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(settle) => {}
            }
            if let Err(err) = tracker.inject().await {
                warn!(target: "session-tracker", session = %tracker.id, ?err, "scanner re-injection failed");
            }
        });
    }

    async fn inject(&self) -> Result<TrackerState, TrackerError> {
        let installed = self.ctx.driver.evaluate(&self.cdp_session, &self.ctx.script).await?;
        let mut inner = self.inner.lock();
        // a navigation or teardown during evaluation wins
        if inner.state == TrackerState::Unattached {
            inner.state = TrackerState::Attached;
        }
        debug!(
            target: "session-tracker",
            session = %self.id,
            fresh = installed.as_bool().unwrap_or(false),
            state = ?inner.state,
            "click scanner injected"
        );
        Ok(inner.state)
    }

    fn block(&self) -> TrackerState {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = TrackerState::Blocked;
        }
        inner.state
    }
}

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use cdp_adapter::{EventStream, RawEvent, TargetInfo};
use dashmap::{DashMap, DashSet};
use devpipe_core_types::{FrameNavigated, SessionId};
use event_pipeline::{LifecycleEvent, LoggingSwitch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::TrackerError;
use crate::model::TrackerSnapshot;
use crate::tracker::{SessionTracker, TrackerContext};

/// Owns every [`SessionTracker`] and routes adapter events to them.
///
/// Trackers are keyed by CDP session id. Session ids handed to the pipeline (`tab-N`) keep
/// counting across reconnects so records from different connections never share one.
pub struct SessionRegistry {
    ctx: Arc<TrackerContext>,
    switch: LoggingSwitch,
    next_index: AtomicUsize,
    trackers: DashMap<String, Arc<SessionTracker>>,
    targets: DashMap<String, SessionId>,
    urls: DashMap<String, String>,
    pending_tabs: DashSet<String>,
    // bumped on every disconnect; new-tab tasks from an older connection give up
    epoch: AtomicU64,
    cancel: CancellationToken,
}

impl SessionRegistry {
    pub fn new(ctx: TrackerContext, switch: LoggingSwitch) -> Self {
        Self {
            ctx: Arc::new(ctx),
            switch,
            next_index: AtomicUsize::new(0),
            trackers: DashMap::new(),
            targets: DashMap::new(),
            urls: DashMap::new(),
            pending_tabs: DashSet::new(),
            epoch: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Attach to the tabs already open in the browser.
    ///
    /// Single-tab mode tracks exactly one page; a blank one is opened when there is none.
    /// Per-tab failures are logged and skipped. Fails only when no tab could be attached.
    pub async fn discover(&self) -> Result<Vec<SessionId>, TrackerError> {
        let multi_tab = self.ctx.config.multi_tab;
        if !multi_tab && !self.trackers.is_empty() {
            return Ok(self.session_ids());
        }

        let mut pages = self.ctx.driver.list_pages().await?;
        if pages.is_empty() {
            let target_id = self.ctx.driver.create_page("about:blank").await?;
            info!(target: "session-tracker", target = %target_id, "no open page; created a blank one");
            pages.push(TargetInfo {
                target_id,
                target_type: "page".into(),
                url: "about:blank".into(),
                title: String::new(),
                opener_id: None,
            });
        }
        if !multi_tab {
            pages.truncate(1);
        }

        let mut attached = Vec::new();
        let mut failures = 0usize;
        for page in pages {
            if self.targets.contains_key(&page.target_id) {
                continue;
            }
            self.urls.insert(page.target_id.clone(), page.url.clone());
            match self.attach_existing(&page).await {
                Ok(id) => attached.push(id),
                Err(err) => {
                    failures += 1;
                    warn!(target: "session-tracker", target = %page.target_id, ?err, "failed to attach to tab");
                }
            }
        }

        if failures > 0 && self.trackers.is_empty() {
            return Err(TrackerError::NoPages);
        }
        Ok(attached)
    }

    /// Attach a tracker to `page` under a fresh session id.
    ///
    /// An error means no CDP session could be obtained. Failures after that (domain enabling,
    /// injection) are logged and leave the tracker registered but inert.
    pub async fn attach_existing(&self, page: &TargetInfo) -> Result<SessionId, TrackerError> {
        let cdp_session = self.ctx.driver.attach(&page.target_id).await?;
        let id = SessionId::tab(self.next_index.fetch_add(1, Ordering::SeqCst));
        let tracker = Arc::new(SessionTracker::new(
            id.clone(),
            page.target_id.clone(),
            cdp_session.clone(),
            Arc::clone(&self.ctx),
            self.cancel.child_token(),
        ));

        // registered before attaching so the first events after Network.enable find it
        self.targets.insert(page.target_id.clone(), id.clone());
        self.trackers.insert(cdp_session, Arc::clone(&tracker));

        let url = self
            .urls
            .get(&page.target_id)
            .map(|u| u.value().clone())
            .unwrap_or_else(|| page.url.clone());
        match tracker.attach(&url).await {
            Ok(state) => {
                info!(target: "session-tracker", session = %id, url = %url, ?state, "tracking tab")
            }
            Err(err) => {
                warn!(target: "session-tracker", session = %id, ?err, "tab attached without listeners")
            }
        }
        Ok(id)
    }

    /// Route adapter events until the stream ends or the registry is shut down.
    pub async fn run(self: Arc<Self>, mut events: EventStream) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event).await;
        }
        debug!(target: "session-tracker", "event routing stopped");
    }

    pub async fn handle_event(self: &Arc<Self>, event: RawEvent) {
        match event {
            RawEvent::TargetCreated(info) => {
                if !info.is_page() {
                    return;
                }
                self.urls.insert(info.target_id.clone(), info.url.clone());
                if self.ctx.config.multi_tab
                    && !self.targets.contains_key(&info.target_id)
                    && self.pending_tabs.insert(info.target_id.clone())
                {
                    let registry = Arc::clone(self);
                    tokio::spawn(async move { registry.follow_new_tab(info).await });
                }
            }
            RawEvent::TargetInfoChanged(info) => {
                if info.is_page() && self.urls.contains_key(&info.target_id) {
                    self.urls.insert(info.target_id, info.url);
                }
            }
            RawEvent::TargetDestroyed { target_id } => {
                self.urls.remove(&target_id);
                self.pending_tabs.remove(&target_id);
                if let Some((_, id)) = self.targets.remove(&target_id) {
                    self.trackers.retain(|_, tracker| {
                        if tracker.target_id() == target_id {
                            tracker.teardown();
                            false
                        } else {
                            true
                        }
                    });
                    info!(target: "session-tracker", session = %id, "tab closed");
                }
            }
            RawEvent::DetachedFromTarget { cdp_session } => {
                if let Some((_, tracker)) = self.trackers.remove(&cdp_session) {
                    tracker.teardown();
                    self.targets.remove(tracker.target_id());
                    info!(target: "session-tracker", session = %tracker.id(), "tab detached");
                }
            }
            RawEvent::RequestWillBeSent {
                cdp_session,
                request,
            } => {
                if let Some(tracker) = self.tracker_for_cdp(&cdp_session) {
                    tracker.on_request(request);
                }
            }
            RawEvent::ConsoleApiCalled { cdp_session, call } => {
                if let Some(tracker) = self.tracker_for_cdp(&cdp_session) {
                    tracker.on_console(&call);
                }
            }
            RawEvent::FrameNavigated {
                cdp_session,
                frame_id,
                parent_frame_id,
                url,
            } => {
                if let Some(tracker) = self.tracker_for_cdp(&cdp_session) {
                    let nav = FrameNavigated {
                        session_id: tracker.id().clone(),
                        frame_id,
                        parent_frame_id,
                        url,
                    };
                    tracker.handle_navigation(&nav);
                }
            }
            RawEvent::AttachedToTarget { .. } => {}
            RawEvent::Disconnected => {
                let dropped = self.reset();
                warn!(target: "session-tracker", dropped, "browser connection lost; all tabs detached");
                if self.ctx.inputs.lifecycle.send(LifecycleEvent::Reconnected).is_err() {
                    debug!(target: "session-tracker", "pipeline closed; reset not delivered");
                }
            }
            RawEvent::Reconnected => match self.discover().await {
                Ok(ids) => {
                    info!(target: "session-tracker", tabs = ids.len(), "tabs rediscovered after reconnect")
                }
                Err(err) => {
                    warn!(target: "session-tracker", ?err, "tab rediscovery failed after reconnect")
                }
            },
        }
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .trackers
            .iter()
            .map(|entry| entry.value().id().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn tracker(&self, id: &SessionId) -> Option<Arc<SessionTracker>> {
        self.trackers
            .iter()
            .find(|entry| entry.value().id() == id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn snapshot(&self) -> Vec<TrackerSnapshot> {
        let mut all: Vec<TrackerSnapshot> = self
            .trackers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        all
    }

    /// Stop routing and detach every tab from the browser.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let trackers: Vec<Arc<SessionTracker>> = self
            .trackers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.trackers.clear();
        self.targets.clear();
        for tracker in trackers {
            if let Err(err) = tracker.detach().await {
                debug!(target: "session-tracker", session = %tracker.id(), ?err, "detach on shutdown failed");
            }
        }
    }

    fn tracker_for_cdp(&self, cdp_session: &str) -> Option<Arc<SessionTracker>> {
        self.trackers
            .get(cdp_session)
            .map(|entry| Arc::clone(entry.value()))
    }

    async fn follow_new_tab(self: Arc<Self>, info: TargetInfo) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.ctx.config.new_tab_settle()) => {}
        }
        self.pending_tabs.remove(&info.target_id);

        if self.epoch.load(Ordering::SeqCst) != epoch || !self.urls.contains_key(&info.target_id) {
            debug!(target: "session-tracker", target = %info.target_id, "new tab gone before attach");
            return;
        }
        if !self.switch.is_active() {
            debug!(target: "session-tracker", target = %info.target_id, "logging paused; new tab not tracked");
            return;
        }
        if self.targets.contains_key(&info.target_id) {
            return;
        }

        match self.attach_existing(&info).await {
            Ok(session_id) => {
                let url = self
                    .tracker(&session_id)
                    .map(|tracker| tracker.url())
                    .unwrap_or(info.url);
                let event = LifecycleEvent::NewTab { session_id, url };
                if self.ctx.inputs.lifecycle.send(event).is_err() {
                    debug!(target: "session-tracker", "pipeline closed; new tab not recorded");
                }
            }
            Err(err) => {
                warn!(target: "session-tracker", target = %info.target_id, ?err, "failed to attach to new tab")
            }
        }
    }

    fn reset(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = self.trackers.len();
        for entry in self.trackers.iter() {
            entry.value().teardown();
        }
        self.trackers.clear();
        self.targets.clear();
        self.urls.clear();
        self.pending_tabs.clear();
        dropped
    }
}

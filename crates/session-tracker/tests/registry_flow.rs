use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    event_bus, AdapterError, AdapterErrorKind, EventBus, NetworkRequest, PageDriver, RawEvent,
    TargetInfo,
};
use devpipe_core_types::{ConsoleMessage, RequestSent, SessionId};
use event_pipeline::{LifecycleEvent, LoggingSwitch, PipelineInputs};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::Value;
use session_tracker::{
    SessionRegistry, TrackerConfig, TrackerContext, TrackerError, TrackerState,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

#[derive(Default)]
struct FakeBrowser {
    pages: Mutex<Vec<TargetInfo>>,
    refuse_attach: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBrowser {
    fn with_pages(pages: &[(&str, &str)]) -> Arc<Self> {
        let browser = Self::default();
        *browser.pages.lock() = pages.iter().map(|(id, url)| page(id, url)).collect();
        Arc::new(browser)
    }

    fn refuse(&self, target_id: &str) {
        self.refuse_attach.lock().insert(target_id.to_string());
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PageDriver for FakeBrowser {
    async fn list_pages(&self) -> Result<Vec<TargetInfo>, AdapterError> {
        self.record("list".into());
        Ok(self.pages.lock().clone())
    }

    async fn create_page(&self, url: &str) -> Result<String, AdapterError> {
        self.record(format!("create:{url}"));
        self.pages.lock().push(page("T-blank", url));
        Ok("T-blank".into())
    }

    async fn attach(&self, target_id: &str) -> Result<String, AdapterError> {
        self.record(format!("attach:{target_id}"));
        if self.refuse_attach.lock().contains(target_id) {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("No target with given id"));
        }
        Ok(format!("S-{target_id}"))
    }

    async fn detach(&self, cdp_session: &str) -> Result<(), AdapterError> {
        self.record(format!("detach:{cdp_session}"));
        Ok(())
    }

    async fn enable_domains(&self, cdp_session: &str) -> Result<(), AdapterError> {
        self.record(format!("enable:{cdp_session}"));
        Ok(())
    }

    async fn evaluate(&self, cdp_session: &str, _expression: &str) -> Result<Value, AdapterError> {
        self.record(format!("evaluate:{cdp_session}"));
        Ok(Value::Bool(true))
    }
}

fn page(id: &str, url: &str) -> TargetInfo {
    TargetInfo {
        target_id: id.into(),
        target_type: "page".into(),
        url: url.into(),
        title: String::new(),
        opener_id: None,
    }
}

struct Outputs {
    requests: UnboundedReceiver<RequestSent>,
    console: UnboundedReceiver<ConsoleMessage>,
    lifecycle: UnboundedReceiver<LifecycleEvent>,
}

fn registry(
    browser: Arc<FakeBrowser>,
    multi_tab: bool,
) -> (Arc<SessionRegistry>, LoggingSwitch, Outputs) {
    let (requests_tx, requests) = unbounded_channel();
    let (console_tx, console) = unbounded_channel();
    let (lifecycle_tx, lifecycle) = unbounded_channel();
    let inputs = PipelineInputs {
        requests: requests_tx,
        console: console_tx,
        lifecycle: lifecycle_tx,
    };
    let config = TrackerConfig {
        multi_tab,
        ..TrackerConfig::default()
    };
    let switch = LoggingSwitch::default();
    let registry = SessionRegistry::new(TrackerContext::new(browser, config, inputs), switch.clone());
    (
        Arc::new(registry),
        switch,
        Outputs {
            requests,
            console,
            lifecycle,
        },
    )
}

fn spawn_router(registry: &Arc<SessionRegistry>) -> EventBus {
    let (bus, stream) = event_bus();
    tokio::spawn(Arc::clone(registry).run(stream));
    bus
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn single_tab_mode_tracks_one_page() {
    let browser = FakeBrowser::with_pages(&[("T1", "https://x.test/"), ("T2", "https://y.test/")]);
    let (registry, _switch, _out) = registry(browser.clone(), false);

    let ids = registry.discover().await.unwrap();
    assert_eq!(ids, vec![SessionId::tab(0)]);
    assert_eq!(browser.count("attach:T1"), 1);
    assert_eq!(browser.count("attach:T2"), 0);

    // a second discovery keeps the tracked tab
    assert_eq!(registry.discover().await.unwrap(), vec![SessionId::tab(0)]);
    assert_eq!(browser.count("attach:T1"), 1);
}

#[tokio::test]
async fn multi_tab_mode_skips_tabs_that_fail_to_attach() {
    let browser = FakeBrowser::with_pages(&[
        ("T1", "https://x.test/"),
        ("T2", "https://y.test/"),
        ("T3", "chrome://settings/"),
    ]);
    browser.refuse("T2");
    let (registry, _switch, _out) = registry(browser.clone(), true);

    let ids = registry.discover().await.unwrap();
    assert_eq!(ids, vec![SessionId::tab(0), SessionId::tab(1)]);

    let states: Vec<(String, TrackerState)> = registry
        .snapshot()
        .into_iter()
        .map(|s| (s.target_id, s.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("T1".to_string(), TrackerState::Attached),
            ("T3".to_string(), TrackerState::Blocked),
        ]
    );
    assert_eq!(browser.count("evaluate:S-T3"), 0);
}

#[tokio::test]
async fn empty_browser_gets_a_blank_page() {
    let browser = FakeBrowser::with_pages(&[]);
    let (registry, _switch, _out) = registry(browser.clone(), false);

    let ids = registry.discover().await.unwrap();
    assert_eq!(ids, vec![SessionId::tab(0)]);
    assert_eq!(browser.count("create:about:blank"), 1);
    let tracker = registry.tracker(&SessionId::tab(0)).unwrap();
    assert_eq!(tracker.state(), TrackerState::Blocked);
}

#[tokio::test]
async fn discovery_fails_when_no_tab_attaches() {
    let browser = FakeBrowser::with_pages(&[("T1", "https://x.test/")]);
    browser.refuse("T1");
    let (registry, _switch, _out) = registry(browser, true);

    assert!(matches!(registry.discover().await, Err(TrackerError::NoPages)));
    assert!(registry.session_ids().is_empty());
}

#[tokio::test]
async fn events_are_routed_by_cdp_session() {
    let browser = FakeBrowser::with_pages(&[("T1", "https://x.test/")]);
    let (registry, _switch, mut out) = registry(browser, false);
    registry.discover().await.unwrap();
    let bus = spawn_router(&registry);

    let request = NetworkRequest {
        request_id: "7".into(),
        method: "GET".into(),
        url: "https://x.test/api?foo=1".into(),
        ..NetworkRequest::default()
    };
    bus.send(RawEvent::RequestWillBeSent {
        cdp_session: "S-T1".into(),
        request: request.clone(),
    })
    .unwrap();
    bus.send(RawEvent::RequestWillBeSent {
        cdp_session: "S-unknown".into(),
        request,
    })
    .unwrap();
    bus.send(RawEvent::ConsoleApiCalled {
        cdp_session: "S-T1".into(),
        call: cdp_adapter::ConsoleCall {
            kind: "log".into(),
            args: vec!["__UI_SCANNER_DATA__".into(), r#"{"target_text":"Go"}"#.into()],
        },
    })
    .unwrap();
    settle().await;

    let sent = out.requests.try_recv().unwrap();
    assert_eq!(sent.session_id, SessionId::tab(0));
    assert_eq!(sent.request_id.as_deref(), Some("7"));
    assert!(out.requests.try_recv().is_err());

    let click = out.console.try_recv().unwrap();
    assert_eq!(click.session_id, SessionId::tab(0));
    assert_eq!(click.json_payload, r#"{"target_text":"Go"}"#);

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn main_frame_navigation_is_recorded_and_child_frames_are_not() {
    let browser = FakeBrowser::with_pages(&[("T1", "https://x.test/")]);
    let (registry, _switch, mut out) = registry(browser.clone(), false);
    registry.discover().await.unwrap();
    let bus = spawn_router(&registry);

    bus.send(RawEvent::FrameNavigated {
        cdp_session: "S-T1".into(),
        frame_id: "F-ad".into(),
        parent_frame_id: Some("T1".into()),
        url: "https://ads.test/".into(),
    })
    .unwrap();
    bus.send(RawEvent::FrameNavigated {
        cdp_session: "S-T1".into(),
        frame_id: "T1".into(),
        parent_frame_id: None,
        url: "https://x.test/checkout".into(),
    })
    .unwrap();
    settle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    match out.lifecycle.try_recv().unwrap() {
        LifecycleEvent::Navigated { session_id, url } => {
            assert_eq!(session_id, SessionId::tab(0));
            assert_eq!(url, "https://x.test/checkout");
        }
        other => panic!("unexpected lifecycle event: {other:?}"),
    }
    assert!(out.lifecycle.try_recv().is_err());
    // initial injection plus one after the main-frame navigation
    assert_eq!(browser.count("evaluate:S-T1"), 2);

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn new_tabs_are_followed_only_while_logging() {
    let browser = FakeBrowser::with_pages(&[("T1", "https://x.test/")]);
    let (registry, switch, mut out) = registry(browser.clone(), true);
    registry.discover().await.unwrap();
    let bus = spawn_router(&registry);

    switch.start();
    bus.send(RawEvent::TargetCreated(page("T9", "about:blank"))).unwrap();
    bus.send(RawEvent::TargetInfoChanged(page("T9", "https://x.test/popup")))
        .unwrap();
    settle().await;

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert_eq!(browser.count("attach:T9"), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(browser.count("attach:T9"), 1);
    match out.lifecycle.try_recv().unwrap() {
        LifecycleEvent::NewTab { session_id, url } => {
            assert_eq!(session_id, SessionId::tab(1));
            assert_eq!(url, "https://x.test/popup");
        }
        other => panic!("unexpected lifecycle event: {other:?}"),
    }

    switch.pause();
    bus.send(RawEvent::TargetCreated(page("T10", "https://x.test/other")))
        .unwrap();
    settle().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(browser.count("attach:T10"), 0);
    assert!(out.lifecycle.try_recv().is_err());
    assert_eq!(registry.session_ids(), vec![SessionId::tab(0), SessionId::tab(1)]);

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn closed_new_tab_is_not_attached() {
    let browser = FakeBrowser::with_pages(&[("T1", "https://x.test/")]);
    let (registry, switch, _out) = registry(browser.clone(), true);
    registry.discover().await.unwrap();
    let bus = spawn_router(&registry);
    switch.start();

    bus.send(RawEvent::TargetCreated(page("T9", "https://x.test/popup")))
        .unwrap();
    bus.send(RawEvent::TargetDestroyed {
        target_id: "T9".into(),
    })
    .unwrap();
    settle().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(browser.count("attach:T9"), 0);
    registry.shutdown().await;
}

#[tokio::test]
async fn closed_tab_tracker_is_torn_down() {
    let browser = FakeBrowser::with_pages(&[("T1", "https://x.test/"), ("T2", "https://y.test/")]);
    let (registry, _switch, _out) = registry(browser, true);
    registry.discover().await.unwrap();
    let closed = registry.tracker(&SessionId::tab(1)).unwrap();
    let bus = spawn_router(&registry);

    bus.send(RawEvent::TargetDestroyed {
        target_id: "T2".into(),
    })
    .unwrap();
    settle().await;

    assert_eq!(closed.state(), TrackerState::Detached);
    assert_eq!(registry.session_ids(), vec![SessionId::tab(0)]);
    registry.shutdown().await;
}

#[tokio::test]
async fn reconnect_detaches_everything_and_rediscovers() {
    let browser = FakeBrowser::with_pages(&[("T1", "https://x.test/")]);
    let (registry, _switch, mut out) = registry(browser.clone(), false);
    registry.discover().await.unwrap();
    let old = registry.tracker(&SessionId::tab(0)).unwrap();
    let bus = spawn_router(&registry);

    bus.send(RawEvent::Disconnected).unwrap();
    settle().await;
    assert_eq!(old.state(), TrackerState::Detached);
    assert!(registry.session_ids().is_empty());
    assert!(matches!(
        out.lifecycle.try_recv().unwrap(),
        LifecycleEvent::Reconnected
    ));

    bus.send(RawEvent::Reconnected).unwrap();
    settle().await;
    assert_eq!(registry.session_ids(), vec![SessionId::tab(1)]);
    assert_eq!(browser.count("attach:T1"), 2);

    registry.shutdown().await;
    assert_eq!(browser.count("detach:S-T1"), 1);
}

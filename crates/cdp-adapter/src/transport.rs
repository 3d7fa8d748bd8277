use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::probe_browser;

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

type RuntimeFactory = Arc<
    dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<Runtime>, AdapterError>> + Send + Sync,
>;

/// Websocket transport to a browser that is already running with remote debugging enabled.
///
/// The connection is made lazily and replaced on the next call once it has closed.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    current: Arc<Mutex<Option<Arc<Runtime>>>>,
    connect: RuntimeFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let connect: RuntimeFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move {
                let rt = Runtime::connect(cfg).await?;
                Ok(Arc::new(rt))
            })
        });
        Self::with_factory(cfg, connect)
    }

    fn with_factory(cfg: CdpConfig, connect: RuntimeFactory) -> Self {
        Self {
            cfg,
            current: Arc::new(Mutex::new(None)),
            connect,
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    async fn runtime(&self) -> Result<Arc<Runtime>, AdapterError> {
        let mut current = self.current.lock().await;
        match current.as_ref() {
            Some(rt) if rt.is_open() => Ok(rt.clone()),
            _ => {
                let rt = (self.connect)(self.cfg.clone()).await?;
                *current = Some(rt.clone());
                Ok(rt)
            }
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    /// Connect (or reconnect) and subscribe to target discovery. Attaching is left to the
    /// caller so that single-tab mode only ever attaches one page.
    async fn start(&self) -> Result<(), AdapterError> {
        let rt = self.runtime().await?;
        rt.call(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            self.deadline(),
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.runtime().await {
            Ok(rt) => rt.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let rt = self.runtime().await?;
        rt.call(target, method, params, self.deadline()).await
    }
}

type Reply = oneshot::Sender<Result<Value, AdapterError>>;

struct Call {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: Reply,
}

/// One live websocket: a socket task, an optional heartbeat task and the channels to both.
/// `closed` fires when either task gives up; the runtime is useless from then on.
struct Runtime {
    calls: mpsc::Sender<Call>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    closed: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    async fn connect(cfg: CdpConfig) -> Result<Self, AdapterError> {
        // a restarted browser gets a new websocket id, so only a pinned url skips the probe
        let ws_url = match cfg.websocket_url.clone() {
            Some(url) => url,
            None => probe_browser(&cfg).await?.websocket_url,
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(err.to_string())
                    .retriable(true)
            })?;

        let (calls, calls_rx) = mpsc::channel(128);
        let (events_tx, events) = mpsc::channel(1024);
        let closed = CancellationToken::new();

        let socket = SocketLoop {
            conn,
            awaiting: HashMap::new(),
            events: events_tx,
        };
        let mut tasks = vec![tokio::spawn(socket.run(calls_rx, closed.clone()))];
        let beat = Duration::from_millis(cfg.heartbeat_interval_ms);
        if !beat.is_zero() {
            let deadline = Duration::from_millis(cfg.default_deadline_ms);
            let deadline = deadline.min(Duration::from_secs(5));
            let beats = heartbeat(calls.clone(), closed.clone(), beat, deadline);
            tasks.push(tokio::spawn(beats));
        }

        info!(target: "cdp-transport", url = %ws_url, "connected to browser");
        Ok(Self {
            calls,
            events: Mutex::new(events),
            closed,
            tasks,
        })
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (reply, answer) = oneshot::channel();
        let call = Call {
            target,
            method: method.to_string(),
            params,
            reply,
        };
        self.calls
            .send(call)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("connection dropped before the browser answered")),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint(format!("{method} timed out"))
                .retriable(true)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.closed.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Periodic `Browser.getVersion`. A missed beat closes the runtime, which ends the socket loop
/// and with it the event stream.
async fn heartbeat(
    calls: mpsc::Sender<Call>,
    closed: CancellationToken,
    every: Duration,
    deadline: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let (reply, answer) = oneshot::channel();
        let call = Call {
            target: CommandTarget::Browser,
            method: "Browser.getVersion".to_string(),
            params: json!({}),
            reply,
        };
        if calls.send(call).await.is_err() {
            debug!(target: "cdp-transport", "socket loop gone; heartbeat stops");
            return;
        }
        match tokio::time::timeout(deadline, answer).await {
            Ok(Ok(Ok(_))) => continue,
            Ok(Ok(Err(err))) => warn!(target: "cdp-transport", ?err, "heartbeat rejected"),
            Ok(Err(_)) => debug!(target: "cdp-transport", "heartbeat dropped"),
            Err(_) => warn!(target: "cdp-transport", "heartbeat timed out"),
        }
        closed.cancel();
        return;
    }
}

/// Owns the websocket: submits calls, routes responses to their callers and forwards events.
struct SocketLoop {
    conn: Connection<CdpEventMessage>,
    awaiting: HashMap<CallId, Reply>,
    events: mpsc::Sender<TransportEvent>,
}

impl SocketLoop {
    async fn run(mut self, mut calls: mpsc::Receiver<Call>, closed: CancellationToken) {
        let outcome = loop {
            tokio::select! {
                _ = closed.cancelled() => {
                    break Err(AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("browser stopped answering heartbeats"));
                }
                Some(call) = calls.recv() => {
                    if let Err(err) = self.submit(call) {
                        break Err(err);
                    }
                }
                message = self.conn.next() => match message {
                    Some(Ok(Message::Response(resp))) => self.answer(resp),
                    Some(Ok(Message::Event(event))) => {
                        if let Err(err) = forward(&self.events, event).await {
                            warn!(target: "cdp-transport", ?err, "failed to forward event");
                        }
                    }
                    Some(Err(err)) => break Err(map_cdp_error(err)),
                    None => break Ok(()),
                },
            }
        };

        closed.cancel();
        let err = match outcome {
            Ok(()) => {
                debug!(target: "cdp-transport", "cdp connection closed");
                AdapterError::new(AdapterErrorKind::CdpIo).with_hint("cdp connection closed")
            }
            Err(err) => {
                error!(target: "cdp-transport", ?err, "socket loop terminated with error");
                err
            }
        };
        for (_, reply) in self.awaiting.drain() {
            let _ = reply.send(Err(err.clone()));
        }
    }

    fn submit(&mut self, call: Call) -> Result<(), AdapterError> {
        let session = match call.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };
        let method: MethodId = call.method.into();
        match self.conn.submit_command(method, session, call.params) {
            Ok(id) => {
                self.awaiting.insert(id, call.reply);
                Ok(())
            }
            Err(err) => {
                let err = AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string());
                let _ = call.reply.send(Err(err.clone()));
                Err(err)
            }
        }
    }

    fn answer(&mut self, resp: Response) {
        if let Some(reply) = self.awaiting.remove(&resp.id) {
            let _ = reply.send(response_payload(resp));
        }
    }
}

async fn forward(
    events: &mpsc::Sender<TransportEvent>,
    event: CdpEventMessage,
) -> Result<(), AdapterError> {
    let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Decode)
            .with_hint(format!("failed to decode cdp event: {err}"))
    })?;
    let event = TransportEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    };
    events
        .send(event)
        .await
        .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))
}

fn response_payload(resp: Response) -> Result<Value, AdapterError> {
    match (resp.result, resp.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500)),
        (None, None) => {
            Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response"))
        }
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    let kind = match err {
        CdpError::Timeout => AdapterErrorKind::Timeout,
        CdpError::Serde(_) | CdpError::DecodeError(_) => AdapterErrorKind::Decode,
        CdpError::FrameNotFound(_) | CdpError::JavascriptException(_) => {
            AdapterErrorKind::Internal
        }
        _ => AdapterErrorKind::CdpIo,
    };
    let retriable = matches!(kind, AdapterErrorKind::Timeout | AdapterErrorKind::CdpIo);
    AdapterError::new(kind).with_hint(hint).retriable(retriable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    impl Runtime {
        /// A runtime whose socket side is already gone.
        fn unconnected() -> Self {
            let (calls, _) = mpsc::channel(8);
            let (_, events) = mpsc::channel(8);
            Self {
                calls,
                events: Mutex::new(events),
                closed: CancellationToken::new(),
                tasks: Vec::new(),
            }
        }
    }

    fn counting_factory(connects: Arc<AtomicUsize>) -> RuntimeFactory {
        Arc::new(move |_cfg: CdpConfig| {
            let connects = connects.clone();
            Box::pin(async move {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Runtime::unconnected()))
            })
        })
    }

    #[tokio::test]
    async fn open_runtime_is_reused() {
        let connects = Arc::new(AtomicUsize::new(0));
        let factory = counting_factory(connects.clone());
        let transport = ChromiumTransport::with_factory(CdpConfig::default(), factory);

        let first = transport.runtime().await.unwrap();
        let second = transport.runtime().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_runtime_is_replaced() {
        let connects = Arc::new(AtomicUsize::new(0));
        let factory = counting_factory(connects.clone());
        let transport = ChromiumTransport::with_factory(CdpConfig::default(), factory);

        let first = transport.runtime().await.unwrap();
        first.closed.cancel();

        let second = transport.runtime().await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_open());
    }

    #[tokio::test]
    async fn call_without_socket_is_an_io_error() {
        let rt = Runtime::unconnected();
        let err = rt
            .call(
                CommandTarget::Browser,
                "Browser.getVersion",
                Value::Null,
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
    }

    #[test]
    fn cdp_error_responses_keep_code_and_message() {
        let resp: Response = serde_json::from_value(json!({
            "id": 7,
            "error": {"code": -32000, "message": "No target with given id"}
        }))
        .unwrap();
        let err = response_payload(resp).unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(!err.retriable);
        assert_eq!(
            err.hint.as_deref(),
            Some("cdp error -32000: No target with given id")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_heartbeat_closes_runtime() {
        let (calls, mut calls_rx) = mpsc::channel(8);
        let closed = CancellationToken::new();
        let task = tokio::spawn(heartbeat(
            calls,
            closed.clone(),
            Duration::from_secs(1),
            Duration::from_millis(200),
        ));

        // hold the call without answering it
        let call = calls_rx.recv().await.expect("heartbeat sent");
        assert_eq!(call.method, "Browser.getVersion");
        task.await.unwrap();
        assert!(closed.is_cancelled());
        drop(call);
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::driver::PageDriver;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::{RawEvent, TargetInfo};
use crate::metrics;
use crate::registry::TargetRegistry;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

pub type EventBus = mpsc::UnboundedSender<RawEvent>;
pub type EventStream = mpsc::UnboundedReceiver<RawEvent>;

/// Channel carrying decoded events from the adapter to its single consumer.
pub fn event_bus() -> (EventBus, EventStream) {
    mpsc::unbounded_channel()
}

/// Owns the transport, decodes its events and exposes page operations.
pub struct CdpAdapter {
    pub cfg: CdpConfig,
    bus: EventBus,
    registry: Arc<TargetRegistry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
}

impl CdpAdapter {
    pub fn new(cfg: CdpConfig, bus: EventBus) -> Self {
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, bus, transport)
    }

    pub fn with_transport(cfg: CdpConfig, bus: EventBus, transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            cfg,
            bus,
            registry: Arc::new(TargetRegistry::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
        }
    }

    pub fn registry(&self) -> Arc<TargetRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect the transport and spawn the event loop. Calling it again is a no-op.
    pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = spawn(Self::event_loop(Arc::clone(&self)));
        self.tasks.lock().await.push(loop_task);
        info!(target: "cdp-adapter", "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        const MIN_BACKOFF: Duration = Duration::from_millis(100);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;
        // one Disconnected per outage, however many restarts it takes
        let mut connected = true;

        loop {
            select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => {
                            backoff = MIN_BACKOFF;
                            self.handle_event(ev);
                        }
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            if connected {
                                self.handle_transport_disconnect();
                                connected = false;
                            }
                            warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                            match self.transport.start().await {
                                Ok(()) => {
                                    connected = true;
                                    info!(target: "cdp-adapter", "transport restarted");
                                    let _ = self.bus.send(RawEvent::Reconnected);
                                }
                                Err(err) => {
                                    warn!(target: "cdp-adapter", %err, "transport restart failed");
                                }
                            }
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            sleep(backoff).await;
                            if backoff < MAX_BACKOFF {
                                backoff = (backoff + MIN_BACKOFF).min(MAX_BACKOFF);
                            }
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    fn handle_transport_disconnect(&self) {
        let had_targets = !self.registry.is_empty();
        self.registry.clear();
        metrics::record_reconnect();
        if had_targets {
            warn!(target: "cdp-adapter", "cdp transport lost; known targets were reset");
        }
        let _ = self.bus.send(RawEvent::Disconnected);
    }

    fn handle_event(&self, event: TransportEvent) {
        metrics::record_event();
        let method = event.method.clone();
        match RawEvent::decode(event) {
            Ok(Some(raw)) => {
                self.track(&raw);
                if self.bus.send(raw).is_err() {
                    debug!(target: "cdp-adapter", %method, "no event consumer");
                }
            }
            Ok(None) => {
                debug!(target: "cdp-adapter", %method, "unhandled cdp event");
            }
            Err(err) => {
                debug!(target: "cdp-adapter", %method, %err, "discarding malformed cdp event");
            }
        }
    }

    fn track(&self, raw: &RawEvent) {
        match raw {
            RawEvent::TargetCreated(info) | RawEvent::TargetInfoChanged(info) => {
                self.registry.upsert(info);
            }
            RawEvent::TargetDestroyed { target_id } => {
                self.registry.remove_target(target_id);
            }
            RawEvent::AttachedToTarget {
                cdp_session,
                target,
            } => {
                self.registry.upsert(target);
                self.registry.set_cdp_session(&target.target_id, cdp_session);
            }
            RawEvent::DetachedFromTarget { cdp_session } => {
                self.registry.clear_cdp_session(cdp_session);
            }
            _ => {}
        }
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.dispatch(CommandTarget::Browser, method, params).await
    }

    async fn send_session_command(
        &self,
        cdp_session: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.dispatch(CommandTarget::Session(cdp_session.to_string()), method, params)
            .await
    }

    async fn dispatch(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let start = Instant::now();
        metrics::record_command(method);
        match self.transport.send_command(target, method, params).await {
            Ok(value) => {
                metrics::record_command_success(method, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure(method);
                Err(err)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetTargetsResult {
    #[serde(rename = "targetInfos", default)]
    target_infos: Vec<TargetInfo>,
}

#[derive(Debug, Deserialize)]
struct EvaluateResult {
    result: Option<RemoteObject>,
    #[serde(rename = "exceptionDetails")]
    exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Deserialize)]
struct RemoteObject {
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetails {
    #[serde(default)]
    text: String,
    exception: Option<ExceptionObject>,
}

#[derive(Debug, Deserialize)]
struct ExceptionObject {
    description: Option<String>,
}

fn required_str(response: &Value, field: &str, method: &str) -> Result<String, AdapterError> {
    response
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Decode).with_hint(format!("{method} missing {field}"))
        })
}

#[async_trait]
impl PageDriver for CdpAdapter {
    async fn list_pages(&self) -> Result<Vec<TargetInfo>, AdapterError> {
        let response = self.send_command("Target.getTargets", json!({})).await?;
        let payload: GetTargetsResult = serde_json::from_value(response)
            .map_err(|err| AdapterError::decode("Target.getTargets", err))?;
        let pages: Vec<TargetInfo> = payload
            .target_infos
            .into_iter()
            .filter(TargetInfo::is_page)
            .collect();
        for page in &pages {
            self.registry.upsert(page);
        }
        Ok(pages)
    }

    async fn create_page(&self, url: &str) -> Result<String, AdapterError> {
        let response = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        required_str(&response, "targetId", "Target.createTarget")
    }

    async fn attach(&self, target_id: &str) -> Result<String, AdapterError> {
        let response = self
            .send_command(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let cdp_session = required_str(&response, "sessionId", "Target.attachToTarget")?;
        self.registry.set_cdp_session(target_id, &cdp_session);
        Ok(cdp_session)
    }

    async fn detach(&self, cdp_session: &str) -> Result<(), AdapterError> {
        self.registry.clear_cdp_session(cdp_session);
        self.send_command(
            "Target.detachFromTarget",
            json!({ "sessionId": cdp_session }),
        )
        .await?;
        Ok(())
    }

    async fn enable_domains(&self, cdp_session: &str) -> Result<(), AdapterError> {
        for method in ["Page.enable", "Network.enable", "Runtime.enable"] {
            self.send_session_command(cdp_session, method, json!({}))
                .await?;
        }
        Ok(())
    }

    async fn evaluate(&self, cdp_session: &str, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send_session_command(
                cdp_session,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if response.is_null() {
            return Ok(Value::Null);
        }
        let payload: EvaluateResult = serde_json::from_value(response)
            .map_err(|err| AdapterError::decode("Runtime.evaluate", err))?;
        if let Some(details) = payload.exception_details {
            let description = details
                .exception
                .and_then(|exception| exception.description)
                .unwrap_or(details.text);
            return Err(AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("script threw: {description}")));
        }
        Ok(payload
            .result
            .and_then(|object| object.value)
            .unwrap_or(Value::Null))
    }
}

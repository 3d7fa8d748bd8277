//! The routing task between session trackers and the output queue.

use devpipe_core_types::{CapturedEvent, ConsoleMessage, EventType, RequestSent, SessionId};
use network_tap::{simplify_url, NetworkTap, ResourceBundle, TapConfig, TapOutcome};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::click_limiter::ClickGate;
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::metrics::{DropReason, PipelineStats};
use crate::switch::LoggingSwitch;

/// Page lifecycle notifications from the session registry.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    Navigated { session_id: SessionId, url: String },
    NewTab { session_id: SessionId, url: String },
    /// The browser connection was re-established; all per-session state is stale.
    Reconnected,
}

/// Sending halves of the pipeline's input channels, one per raw event kind.
#[derive(Clone, Debug)]
pub struct PipelineInputs {
    pub requests: UnboundedSender<RequestSent>,
    pub console: UnboundedSender<ConsoleMessage>,
    pub lifecycle: UnboundedSender<LifecycleEvent>,
}

/// Owns every piece of reduction state: the reference table and bundles (via [`NetworkTap`])
/// and the click window. Nothing else mutates them.
pub struct EventPipeline {
    config: PipelineConfig,
    tap: NetworkTap,
    clicks: ClickGate,
    switch: LoggingSwitch,
    stats: PipelineStats,
    output: UnboundedSender<CapturedEvent>,
    requests: UnboundedReceiver<RequestSent>,
    console: UnboundedReceiver<ConsoleMessage>,
    lifecycle: UnboundedReceiver<LifecycleEvent>,
    bundles: UnboundedReceiver<ResourceBundle>,
}

impl EventPipeline {
    pub fn new(
        config: PipelineConfig,
        tap_config: TapConfig,
        switch: LoggingSwitch,
        output: UnboundedSender<CapturedEvent>,
    ) -> (Self, PipelineInputs) {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (console_tx, console) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle) = mpsc::unbounded_channel();
        let (tap, bundles) = NetworkTap::new(tap_config);
        let clicks = ClickGate::new(&config);
        let pipeline = Self {
            config,
            tap,
            clicks,
            switch,
            stats: PipelineStats::default(),
            output,
            requests,
            console,
            lifecycle,
            bundles,
        };
        let inputs = PipelineInputs {
            requests: requests_tx,
            console: console_tx,
            lifecycle: lifecycle_tx,
        };
        (pipeline, inputs)
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    /// Process inputs until `cancel` fires, then drain what is already queued and flush every
    /// pending bundle.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        info!(target: "event-pipeline", "pipeline started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(request) = self.requests.recv() => self.on_request(request).await?,
                Some(message) = self.console.recv() => self.on_console(message)?,
                Some(event) = self.lifecycle.recv() => self.on_lifecycle(event).await?,
                Some(bundle) = self.bundles.recv() => self.emit_bundle(bundle)?,
                else => break,
            }
        }
        self.drain().await?;
        info!(target: "event-pipeline", "pipeline stopped");
        Ok(())
    }

    /// Handle every input that arrived before cancellation, then flush the bundler. Bundles a
    /// timer already handed over are emitted first.
    async fn drain(&mut self) -> Result<(), PipelineError> {
        self.drain_flushed()?;
        while let Ok(request) = self.requests.try_recv() {
            self.on_request(request).await?;
        }
        while let Ok(message) = self.console.try_recv() {
            self.on_console(message)?;
        }
        while let Ok(event) = self.lifecycle.try_recv() {
            self.on_lifecycle(event).await?;
        }
        for bundle in self.tap.flush_all().await {
            self.emit_bundle(bundle)?;
        }
        // a timer may have taken its bundle just before flush_all did
        self.drain_flushed()
    }

    fn drain_flushed(&mut self) -> Result<(), PipelineError> {
        while let Ok(bundle) = self.bundles.try_recv() {
            self.emit_bundle(bundle)?;
        }
        Ok(())
    }

    async fn on_request(&mut self, request: RequestSent) -> Result<(), PipelineError> {
        if !self.switch.is_active() {
            self.stats.record_dropped(DropReason::Paused);
            return Ok(());
        }
        match self.tap.ingest(&request).await {
            Ok(TapOutcome::Emit(payload)) => {
                self.stats.set_reference_entries(self.tap.reference_count());
                let kind = payload.event_type();
                self.emit(kind, Some(request.session_id), payload.into_data())
            }
            Ok(TapOutcome::Bundled) => Ok(()),
            Ok(TapOutcome::Suppressed) => {
                self.stats.record_dropped(DropReason::Suppressed);
                Ok(())
            }
            Err(err) => {
                debug!(target: "event-pipeline", session = %request.session_id, error = %err, "request discarded");
                self.stats.record_dropped(DropReason::Malformed);
                Ok(())
            }
        }
    }

    fn on_console(&mut self, message: ConsoleMessage) -> Result<(), PipelineError> {
        if !self.switch.is_active() {
            self.stats.record_dropped(DropReason::Paused);
            return Ok(());
        }
        if message.marker_prefix != self.config.click_marker {
            trace!(target: "event-pipeline", marker = %message.marker_prefix, "unknown console marker");
            self.stats.record_dropped(DropReason::Malformed);
            return Ok(());
        }
        let payload: Value = match serde_json::from_str(&message.json_payload) {
            Ok(value) => value,
            Err(err) => {
                debug!(target: "event-pipeline", session = %message.session_id, error = %err, "click payload is not JSON");
                self.stats.record_dropped(DropReason::Malformed);
                return Ok(());
            }
        };
        if !self.clicks.accept(&message.session_id, Instant::now()) {
            self.stats.record_dropped(DropReason::RateLimited);
            return Ok(());
        }
        let data = match payload {
            Value::Object(mut map) => {
                map.insert("session_id".into(), json!(message.session_id));
                Value::Object(map)
            }
            other => json!({"session_id": message.session_id, "value": other}),
        };
        self.emit(EventType::UiClick, Some(message.session_id), data)
    }

    async fn on_lifecycle(&mut self, event: LifecycleEvent) -> Result<(), PipelineError> {
        let max_url = self.tap.config().max_url_length;
        match event {
            LifecycleEvent::Navigated { session_id, url } => {
                let data = json!({"session_id": session_id, "url": simplify_url(&url, max_url)});
                self.emit_if_active(EventType::PageNavigation, session_id, data)
            }
            LifecycleEvent::NewTab { session_id, url } => {
                let data = json!({"session_id": session_id, "url": simplify_url(&url, max_url)});
                self.emit_if_active(EventType::NewTabOpened, session_id, data)
            }
            LifecycleEvent::Reconnected => {
                for bundle in self.tap.flush_all().await {
                    self.emit_bundle(bundle)?;
                }
                self.tap.reset_references();
                self.clicks.reset();
                self.stats.set_reference_entries(0);
                self.stats.record_reset();
                warn!(target: "event-pipeline", "browser reconnected; reduction state cleared");
                Ok(())
            }
        }
    }

    fn emit_if_active(
        &mut self,
        kind: EventType,
        session_id: SessionId,
        data: Value,
    ) -> Result<(), PipelineError> {
        if !self.switch.is_active() {
            self.stats.record_dropped(DropReason::Paused);
            return Ok(());
        }
        self.emit(kind, Some(session_id), data)
    }

    /// Bundles only hold resources accepted while logging was active, so they are emitted even
    /// if logging was paused before the quiet window elapsed.
    fn emit_bundle(&mut self, bundle: ResourceBundle) -> Result<(), PipelineError> {
        let data = bundle.to_data();
        self.emit(EventType::ResourceBundle, Some(bundle.session_id), data)
    }

    fn emit(
        &mut self,
        kind: EventType,
        session_id: Option<SessionId>,
        data: Value,
    ) -> Result<(), PipelineError> {
        self.output
            .send(CapturedEvent::now(kind, session_id, data))
            .map_err(|_| PipelineError::QueueClosed)?;
        self.stats.record_emitted(kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> (
        EventPipeline,
        PipelineInputs,
        LoggingSwitch,
        UnboundedReceiver<CapturedEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let switch = LoggingSwitch::default();
        let (pipeline, inputs) = EventPipeline::new(
            PipelineConfig::default(),
            TapConfig::default(),
            switch.clone(),
            out_tx,
        );
        (pipeline, inputs, switch, out_rx)
    }

    fn click(session: usize, payload: &str) -> ConsoleMessage {
        ConsoleMessage {
            session_id: SessionId::tab(session),
            marker_prefix: "__UI_SCANNER_DATA__".into(),
            json_payload: payload.into(),
        }
    }

    #[tokio::test]
    async fn paused_events_are_dropped_not_buffered() {
        let (mut pipeline, _inputs, switch, mut out) = pipeline();
        pipeline.on_console(click(0, r#"{"tag":"BUTTON"}"#)).unwrap();
        assert!(out.try_recv().is_err());

        switch.start();
        pipeline.on_console(click(0, r#"{"tag":"A"}"#)).unwrap();
        let event = out.try_recv().unwrap();
        assert_eq!(event.kind, EventType::UiClick);
        assert_eq!(event.data["tag"], "A");
        assert_eq!(event.data["session_id"], "tab-0");
        assert_eq!(pipeline.stats.snapshot().dropped_paused, 1);
    }

    #[tokio::test]
    async fn click_payload_fields_pass_through() {
        let (mut pipeline, _inputs, switch, mut out) = pipeline();
        switch.start();
        let payload = r#"{"element_path":"nav > a.home","target_text":"Home","inner_content":[{"type":"link","href":"https://x.test/","text":"Home"}],"inner_content_error":null}"#;
        pipeline.on_console(click(3, payload)).unwrap();
        let event = out.try_recv().unwrap();
        assert_eq!(event.data["inner_content"][0]["type"], "link");
        assert_eq!(event.data["inner_content"][0]["href"], "https://x.test/");
        assert_eq!(event.data["element_path"], "nav > a.home");
        assert_eq!(event.data["session_id"], "tab-3");
    }

    #[tokio::test]
    async fn malformed_click_payload_is_discarded() {
        let (mut pipeline, _inputs, switch, mut out) = pipeline();
        switch.start();
        pipeline.on_console(click(0, "{not json")).unwrap();
        assert!(out.try_recv().is_err());
        pipeline.on_console(click(0, r#"{"ok":true}"#)).unwrap();
        assert!(out.try_recv().is_ok());
        assert_eq!(pipeline.stats.snapshot().malformed, 1);
    }

    #[tokio::test]
    async fn navigation_records_carry_session_and_url() {
        let (mut pipeline, _inputs, switch, mut out) = pipeline();
        switch.start();
        pipeline
            .on_lifecycle(LifecycleEvent::Navigated {
                session_id: SessionId::tab(1),
                url: "https://x.test/next".into(),
            })
            .await
            .unwrap();
        let event = out.try_recv().unwrap();
        assert_eq!(event.kind, EventType::PageNavigation);
        assert_eq!(event.session_id, Some(SessionId::tab(1)));
        assert_eq!(event.data, json!({"session_id": "tab-1", "url": "https://x.test/next"}));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_emits_bundle_already_flushed_by_timer() {
        let (mut pipeline, _inputs, switch, mut out) = pipeline();
        switch.start();
        let css = RequestSent::new(SessionId::tab(0), "GET", "https://x.test/site.css")
            .with_resource_type("Stylesheet");
        pipeline.on_request(css).await.unwrap();

        // the quiet window elapses and the timer hands the bundle to the channel
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert_eq!(pipeline.tap.bundler().pending_sessions().await, 0);

        let cancel = CancellationToken::new();
        cancel.cancel();
        pipeline.run(cancel).await.unwrap();

        let event = out.try_recv().expect("bundle emitted at shutdown");
        assert_eq!(event.kind, EventType::ResourceBundle);
        assert_eq!(event.data["resources"]["stylesheets"][0], "https://x.test/site.css");
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_processes_queued_inputs() {
        let (pipeline, inputs, switch, mut out) = pipeline();
        switch.start();
        let xhr = RequestSent::new(SessionId::tab(0), "POST", "https://api.x.test/v1/items")
            .with_resource_type("XHR");
        let logo = RequestSent::new(SessionId::tab(0), "GET", "https://x.test/logo.png")
            .with_resource_type("Image");
        inputs.requests.send(xhr).unwrap();
        inputs.requests.send(logo).unwrap();
        inputs.console.send(click(0, r#"{"tag":"BUTTON"}"#)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        pipeline.run(cancel).await.unwrap();

        let kinds: Vec<EventType> = std::iter::from_fn(|| out.try_recv().ok())
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![EventType::NetworkRequest, EventType::UiClick, EventType::ResourceBundle]
        );
    }

    #[tokio::test]
    async fn closed_queue_is_an_error() {
        let (mut pipeline, _inputs, switch, out) = pipeline();
        switch.start();
        drop(out);
        let err = pipeline
            .on_lifecycle(LifecycleEvent::NewTab {
                session_id: SessionId::tab(2),
                url: "about:blank".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::QueueClosed));
    }
}

use std::collections::HashSet;

use async_trait::async_trait;
use cdp_adapter::{AdapterError, AdapterErrorKind, PageDriver, TargetInfo};
use devpipe_core_types::{ConsoleMessage, RequestSent};
use event_pipeline::{LifecycleEvent, PipelineInputs};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

pub(crate) struct PipelineOutputs {
    pub requests: UnboundedReceiver<RequestSent>,
    pub console: UnboundedReceiver<ConsoleMessage>,
    pub lifecycle: UnboundedReceiver<LifecycleEvent>,
}

pub(crate) fn pipeline_inputs() -> (PipelineInputs, PipelineOutputs) {
    let (requests_tx, requests) = unbounded_channel();
    let (console_tx, console) = unbounded_channel();
    let (lifecycle_tx, lifecycle) = unbounded_channel();
    (
        PipelineInputs {
            requests: requests_tx,
            console: console_tx,
            lifecycle: lifecycle_tx,
        },
        PipelineOutputs {
            requests,
            console,
            lifecycle,
        },
    )
}

/// Records every call as `"<op>:<arg>"`.
#[derive(Default)]
pub(crate) struct MockDriver {
    calls: Mutex<Vec<String>>,
    failing_evaluate: Mutex<HashSet<String>>,
}

impl MockDriver {
    pub fn fail_evaluate(&self, cdp_session: &str) {
        self.failing_evaluate.lock().insert(cdp_session.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn record(&self, op: &str, arg: &str) {
        self.calls.lock().push(format!("{op}:{arg}"));
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn list_pages(&self) -> Result<Vec<TargetInfo>, AdapterError> {
        Ok(Vec::new())
    }

    async fn create_page(&self, url: &str) -> Result<String, AdapterError> {
        self.record("create", url);
        Ok("T-new".into())
    }

    async fn attach(&self, target_id: &str) -> Result<String, AdapterError> {
        self.record("attach", target_id);
        Ok(format!("S-{target_id}"))
    }

    async fn detach(&self, cdp_session: &str) -> Result<(), AdapterError> {
        self.record("detach", cdp_session);
        Ok(())
    }

    async fn enable_domains(&self, cdp_session: &str) -> Result<(), AdapterError> {
        self.record("enable", cdp_session);
        Ok(())
    }

    async fn evaluate(&self, cdp_session: &str, _expression: &str) -> Result<Value, AdapterError> {
        self.record("evaluate", cdp_session);
        if self.failing_evaluate.lock().contains(cdp_session) {
            return Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("script threw"));
        }
        Ok(Value::Bool(true))
    }
}

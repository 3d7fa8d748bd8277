//! Typed view of the CDP events the capture pipeline cares about.
//!
//! Every payload is decoded through a serde struct with explicit optional fields. Events the
//! pipeline has no use for decode to `None` and are dropped by the adapter.

use std::collections::BTreeMap;

use devpipe_core_types::{CallFrame, Initiator, RequestSent, SessionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AdapterError;
use crate::transport::TransportEvent;

/// A browser target as reported by `Target.*` events and `Target.getTargets`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "openerId", default, skip_serializing_if = "Option::is_none")]
    pub opener_id: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// `Network.requestWillBeSent`, stripped to what the pipeline reduces on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkRequest {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub resource_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub post_data: Option<String>,
    pub initiator: Option<Initiator>,
    pub timestamp: Option<f64>,
    pub wall_time: Option<f64>,
}

impl NetworkRequest {
    /// Tag the request with the devpipe session that observed it.
    pub fn into_request_sent(self, session_id: SessionId) -> RequestSent {
        RequestSent {
            session_id,
            request_id: Some(self.request_id),
            method: self.method,
            url: self.url,
            resource_type: self.resource_type,
            headers: self.headers,
            post_data: self.post_data,
            initiator: self.initiator,
            timestamp: self.timestamp,
            wall_time: self.wall_time,
        }
    }
}

/// `Runtime.consoleAPICalled` with the primitive argument values kept.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsoleCall {
    pub kind: String,
    pub args: Vec<Value>,
}

impl ConsoleCall {
    /// The JSON text following `marker`, if this call was made by the click scanner.
    ///
    /// The scanner logs the marker and the JSON as two arguments; a single argument with the
    /// JSON appended to the marker is accepted as well.
    pub fn marked_payload(&self, marker: &str) -> Option<String> {
        let first = self.args.first()?.as_str()?;
        let rest = first.strip_prefix(marker)?.trim();
        if !rest.is_empty() {
            return Some(rest.to_string());
        }
        match self.args.get(1)? {
            Value::String(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Raw events emitted by the adapter, keyed by the CDP session that produced them.
#[derive(Clone, Debug, PartialEq)]
pub enum RawEvent {
    TargetCreated(TargetInfo),
    TargetInfoChanged(TargetInfo),
    TargetDestroyed {
        target_id: String,
    },
    AttachedToTarget {
        cdp_session: String,
        target: TargetInfo,
    },
    DetachedFromTarget {
        cdp_session: String,
    },
    RequestWillBeSent {
        cdp_session: String,
        request: NetworkRequest,
    },
    ConsoleApiCalled {
        cdp_session: String,
        call: ConsoleCall,
    },
    FrameNavigated {
        cdp_session: String,
        frame_id: String,
        parent_frame_id: Option<String>,
        url: String,
    },
    /// The transport stream ended. Every CDP session id seen so far is invalid.
    Disconnected,
    /// The transport came back after a `Disconnected`. Targets must be rediscovered.
    Reconnected,
}

impl RawEvent {
    /// Decode a transport event. `Ok(None)` means the method is not one the pipeline consumes
    /// or it arrived without the session it needs.
    pub fn decode(event: TransportEvent) -> Result<Option<Self>, AdapterError> {
        let TransportEvent {
            method,
            params,
            session_id,
        } = event;
        let raw = match method.as_str() {
            "Target.targetCreated" => {
                let payload: TargetInfoParams = from_params(&method, params)?;
                Self::TargetCreated(payload.target_info)
            }
            "Target.targetInfoChanged" => {
                let payload: TargetInfoParams = from_params(&method, params)?;
                Self::TargetInfoChanged(payload.target_info)
            }
            "Target.targetDestroyed" => {
                let payload: TargetDestroyedParams = from_params(&method, params)?;
                Self::TargetDestroyed {
                    target_id: payload.target_id,
                }
            }
            "Target.attachedToTarget" => {
                let payload: AttachedToTargetParams = from_params(&method, params)?;
                Self::AttachedToTarget {
                    cdp_session: payload.session_id,
                    target: payload.target_info,
                }
            }
            "Target.detachedFromTarget" => {
                let payload: DetachedFromTargetParams = from_params(&method, params)?;
                Self::DetachedFromTarget {
                    cdp_session: payload.session_id,
                }
            }
            "Network.requestWillBeSent" => {
                let Some(cdp_session) = session_id else {
                    return Ok(None);
                };
                let payload: RequestWillBeSentParams = from_params(&method, params)?;
                Self::RequestWillBeSent {
                    cdp_session,
                    request: payload.into(),
                }
            }
            "Runtime.consoleAPICalled" => {
                let Some(cdp_session) = session_id else {
                    return Ok(None);
                };
                let payload: ConsoleApiCalledParams = from_params(&method, params)?;
                Self::ConsoleApiCalled {
                    cdp_session,
                    call: ConsoleCall {
                        kind: payload.kind,
                        args: payload
                            .args
                            .into_iter()
                            .map(|arg| arg.value.unwrap_or(Value::Null))
                            .collect(),
                    },
                }
            }
            "Page.frameNavigated" => {
                let Some(cdp_session) = session_id else {
                    return Ok(None);
                };
                let payload: FrameNavigatedParams = from_params(&method, params)?;
                Self::FrameNavigated {
                    cdp_session,
                    frame_id: payload.frame.id,
                    parent_frame_id: payload.frame.parent_id,
                    url: payload.frame.url,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(raw))
    }
}

fn from_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, AdapterError> {
    serde_json::from_value(params).map_err(|err| AdapterError::decode(method, err))
}

#[derive(Debug, Deserialize)]
struct TargetInfoParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
struct TargetDestroyedParams {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachedToTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "targetInfo")]
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
struct DetachedFromTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestWillBeSentParams {
    request_id: String,
    request: RequestPayload,
    #[serde(rename = "type")]
    resource_type: Option<String>,
    initiator: Option<InitiatorPayload>,
    timestamp: Option<f64>,
    wall_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestPayload {
    method: String,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, Value>,
    post_data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiatorPayload {
    #[serde(rename = "type")]
    kind: String,
    url: Option<String>,
    line_number: Option<f64>,
    stack: Option<StackTracePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackTracePayload {
    #[serde(default)]
    call_frames: Vec<CallFramePayload>,
    parent: Option<Box<StackTracePayload>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallFramePayload {
    #[serde(default)]
    function_name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    line_number: u64,
    #[serde(default)]
    column_number: u64,
}

#[derive(Debug, Deserialize)]
struct ConsoleApiCalledParams {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    args: Vec<RemoteObjectPayload>,
}

#[derive(Debug, Deserialize)]
struct RemoteObjectPayload {
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FrameNavigatedParams {
    frame: FramePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FramePayload {
    id: String,
    parent_id: Option<String>,
    url: String,
}

impl From<RequestWillBeSentParams> for NetworkRequest {
    fn from(params: RequestWillBeSentParams) -> Self {
        let headers = params
            .request
            .headers
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(text) => (name, text),
                other => (name, other.to_string()),
            })
            .collect();
        Self {
            request_id: params.request_id,
            method: params.request.method,
            url: params.request.url,
            resource_type: params.resource_type,
            headers,
            post_data: params.request.post_data,
            initiator: params.initiator.map(Initiator::from),
            timestamp: params.timestamp,
            wall_time: params.wall_time,
        }
    }
}

impl From<InitiatorPayload> for Initiator {
    fn from(payload: InitiatorPayload) -> Self {
        // async stacks chain through `parent`; flatten them innermost first
        let mut stack = Vec::new();
        let mut next = payload.stack;
        while let Some(trace) = next {
            stack.extend(trace.call_frames.into_iter().map(|frame| CallFrame {
                function_name: frame.function_name,
                url: frame.url,
                line_number: frame.line_number,
                column_number: frame.column_number,
            }));
            next = trace.parent.map(|parent| *parent);
        }
        Initiator {
            kind: payload.kind,
            url: payload.url,
            line_number: payload.line_number.map(|line| line.max(0.0) as u64),
            stack,
        }
    }
}

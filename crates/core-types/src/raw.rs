//! Typed raw events submitted by session trackers.
//!
//! Each struct carries explicit optional fields for whatever the browser may omit, so consumers
//! test for presence instead of probing loosely-typed payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SessionId;

/// A request about to be sent by a monitored page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestSent {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<Initiator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<f64>,
}

impl RequestSent {
    pub fn new(session_id: SessionId, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            session_id,
            request_id: None,
            method: method.into(),
            url: url.into(),
            resource_type: None,
            headers: BTreeMap::new(),
            post_data: None,
            initiator: None,
            timestamp: None,
            wall_time: None,
        }
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_initiator(mut self, initiator: Initiator) -> Self {
        self.initiator = Some(initiator);
        self
    }
}

/// What caused a request, as reported by the browser.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Initiator {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<CallFrame>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub line_number: u64,
    #[serde(default)]
    pub column_number: u64,
}

impl CallFrame {
    /// Compact `function@url:line` rendering used in log records.
    pub fn simplified(&self) -> String {
        let function = if self.function_name.is_empty() {
            "(anonymous)"
        } else {
            self.function_name.as_str()
        };
        format!("{}@{}:{}", function, self.url, self.line_number)
    }
}

/// A console message whose first argument started with a recognised marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub session_id: SessionId,
    pub marker_prefix: String,
    pub json_payload: String,
}

/// A committed frame navigation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameNavigated {
    pub session_id: SessionId,
    pub frame_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_frame_id: Option<String>,
    pub url: String,
}

impl FrameNavigated {
    pub fn is_top_level(&self) -> bool {
        self.parent_frame_id.is_none()
    }
}

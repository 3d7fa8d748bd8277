//! First-seen reference table and structural diffing of repeated requests.

use std::collections::HashMap;

use devpipe_core_types::{EventType, RequestSent};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::TapConfig;
use crate::truncate::{simplify_url, truncate_str, truncate_value, TruncateLimits};
use crate::TapError;

/// Fields that make up the fingerprint or identify one delivery. They never count as change.
const IDENTITY_FIELDS: [&str; 4] = ["session_id", "request_id", "method", "url"];

/// Record produced by [`ReferenceDiffer::record`].
#[derive(Clone, Debug, PartialEq)]
pub enum CapturedPayload {
    NetworkRequest(Value),
    NetworkDiff(Value),
}

impl CapturedPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            CapturedPayload::NetworkRequest(_) => EventType::NetworkRequest,
            CapturedPayload::NetworkDiff(_) => EventType::NetworkDiff,
        }
    }

    pub fn data(&self) -> &Value {
        match self {
            CapturedPayload::NetworkRequest(data) | CapturedPayload::NetworkDiff(data) => data,
        }
    }

    pub fn into_data(self) -> Value {
        match self {
            CapturedPayload::NetworkRequest(data) | CapturedPayload::NetworkDiff(data) => data,
        }
    }
}

/// Holds one baseline per fingerprint for the lifetime of a monitoring session.
///
/// Baselines are stored in their diff projection and are never replaced; only
/// [`ReferenceDiffer::reset`] drops them.
pub struct ReferenceDiffer {
    config: TapConfig,
    limits: TruncateLimits,
    references: HashMap<String, Value>,
    warned: bool,
}

impl ReferenceDiffer {
    pub fn new(config: TapConfig) -> Self {
        let limits = TruncateLimits {
            max_value_length: config.max_value_length,
            max_container_entries: config.max_container_entries,
        };
        Self {
            config,
            limits,
            references: HashMap::new(),
            warned: false,
        }
    }

    pub fn record(
        &mut self,
        fingerprint: &str,
        request: &RequestSent,
    ) -> Result<Option<CapturedPayload>, TapError> {
        let projected = project(request)?;
        let Some(reference) = self.references.get(fingerprint) else {
            self.references.insert(fingerprint.to_string(), projected);
            self.check_growth();
            return Ok(Some(CapturedPayload::NetworkRequest(
                self.summarize(fingerprint, request),
            )));
        };

        let mut changes = Vec::new();
        collect_changes(reference, &projected, "", &mut changes);

        let mut kept = Map::new();
        for (path, value) in changes {
            if self.is_denied(&path) {
                continue;
            }
            kept.insert(path, truncate_value(&value, &self.limits));
        }

        if kept.is_empty() {
            debug!(target: "network-tap", fingerprint, "identical repeat suppressed");
            return Ok(None);
        }

        let mut data = json!({
            "fingerprint": fingerprint,
            "session_id": request.session_id,
            "method": request.method,
            "url": simplify_url(&request.url, self.config.max_url_length),
            "changes": Value::Object(kept),
        });
        if let Some(request_id) = &request.request_id {
            data["request_id"] = json!(request_id);
        }
        if let Some(query) = query_of(&request.url) {
            data["url_params"] = json!(truncate_str(&query, self.config.max_value_length));
        }
        Ok(Some(CapturedPayload::NetworkDiff(data)))
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.references.contains_key(fingerprint)
    }

    /// Drop every baseline. Used on full reconnect.
    pub fn reset(&mut self) {
        self.references.clear();
        self.warned = false;
    }

    fn check_growth(&mut self) {
        let count = self.references.len();
        if !self.warned && count >= self.config.reference_warn_threshold {
            self.warned = true;
            warn!(
                target: "network-tap",
                count,
                "reference table is large; start a new log session to release it"
            );
        }
    }

    fn is_denied(&self, path: &str) -> bool {
        self.config.diff_deny_list.iter().any(|entry| {
            path == entry
                || path
                    .strip_prefix(entry.as_str())
                    .map(|rest| rest.starts_with('.') || rest.starts_with('['))
                    .unwrap_or(false)
        })
    }

    fn summarize(&self, fingerprint: &str, request: &RequestSent) -> Value {
        let mut headers = Map::new();
        for wanted in &self.config.important_headers {
            if headers.len() >= self.config.max_important_headers {
                break;
            }
            if let Some((_, value)) = request
                .headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            {
                headers.insert(
                    wanted.clone(),
                    json!(truncate_str(value, self.config.max_value_length)),
                );
            }
        }

        let stack: Vec<String> = request
            .initiator
            .as_ref()
            .map(|initiator| {
                initiator
                    .stack
                    .iter()
                    .take(self.config.max_stack_frames)
                    .map(|frame| truncate_str(&frame.simplified(), self.config.max_url_length))
                    .collect()
            })
            .unwrap_or_default();

        let mut data = json!({
            "fingerprint": fingerprint,
            "session_id": request.session_id,
            "method": request.method,
            "url": simplify_url(&request.url, self.config.max_url_length),
            "resource_type": request.resource_type,
            "headers": Value::Object(headers),
            "initiator": stack,
        });
        if let Some(request_id) = &request.request_id {
            data["request_id"] = json!(request_id);
        }
        data
    }
}

fn project(request: &RequestSent) -> Result<Value, TapError> {
    let mut value = serde_json::to_value(request)?;
    if let Value::Object(map) = &mut value {
        for field in IDENTITY_FIELDS {
            map.remove(field);
        }
    }
    Ok(value)
}

fn query_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.query().map(str::to_string))
        .filter(|query| !query.is_empty())
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Scalar leaves whose value changed between `old` and `new`.
///
/// Keys present on only one side and type changes are not value changes and are skipped.
/// Arrays are compared as multisets: equal items cancel out regardless of position, and the
/// leftovers are paired in order and compared recursively.
fn collect_changes(old: &Value, new: &Value, path: &str, out: &mut Vec<(String, Value)>) {
    match (old, new) {
        (Value::Object(before), Value::Object(after)) => {
            for (key, value) in after {
                if let Some(previous) = before.get(key) {
                    collect_changes(previous, value, &join(path, key), out);
                }
            }
        }
        (Value::Array(before), Value::Array(after)) => {
            let mut unmatched_before: Vec<&Value> = before.iter().collect();
            let mut unmatched_after = Vec::new();
            for (index, item) in after.iter().enumerate() {
                match unmatched_before.iter().position(|candidate| *candidate == item) {
                    Some(pos) => {
                        unmatched_before.remove(pos);
                    }
                    None => unmatched_after.push((index, item)),
                }
            }
            for (previous, (index, item)) in unmatched_before.into_iter().zip(unmatched_after) {
                collect_changes(previous, item, &format!("{path}[{index}]"), out);
            }
        }
        (Value::String(a), Value::String(b)) if a != b => out.push((path.to_string(), new.clone())),
        (Value::Number(a), Value::Number(b)) if a != b => out.push((path.to_string(), new.clone())),
        (Value::Bool(a), Value::Bool(b)) if a != b => out.push((path.to_string(), new.clone())),
        _ => {}
    }
}

//! Size limits for values written to the log.
//!
//! Every function here is idempotent: feeding an already-truncated value back in returns it
//! unchanged.

use serde_json::{Map, Value};

const MARKER_OPEN: &str = "...<truncated ";
const MARKER_CLOSE: &str = " chars>";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncateLimits {
    pub max_value_length: usize,
    pub max_container_entries: usize,
}

impl Default for TruncateLimits {
    fn default() -> Self {
        Self {
            max_value_length: 128,
            max_container_entries: 5,
        }
    }
}

/// Cut `text` to `max` characters and annotate the original length.
pub fn truncate_str(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max || is_truncated(text, max) {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{head}{MARKER_OPEN}{total}{MARKER_CLOSE}")
}

fn is_truncated(text: &str, max: usize) -> bool {
    let Some(body) = text.strip_suffix(MARKER_CLOSE) else {
        return false;
    };
    let Some(idx) = body.rfind(MARKER_OPEN) else {
        return false;
    };
    let head = &body[..idx];
    let original = &body[idx + MARKER_OPEN.len()..];
    head.chars().count() == max && original.parse::<usize>().map(|n| n > max).unwrap_or(false)
}

/// Apply string and container limits recursively.
pub fn truncate_value(value: &Value, limits: &TruncateLimits) -> Value {
    match value {
        Value::String(text) => Value::String(truncate_str(text, limits.max_value_length)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(limits.max_container_entries)
                .map(|item| truncate_value(item, limits))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map.iter().take(limits.max_container_entries) {
                out.insert(key.clone(), truncate_value(item, limits));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Short form of a URL for log records: `data:` URLs collapse to their media type, everything
/// else is length-capped.
pub fn simplify_url(url: &str, max: usize) -> String {
    if let Some(rest) = url.strip_prefix("data:") {
        let media = rest.split(|c| c == ',' || c == ';').next().unwrap_or_default();
        return format!("data:{media}");
    }
    truncate_str(url, max)
}

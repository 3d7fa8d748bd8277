use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SessionId;

/// Record kinds written to the capture log.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SessionStart,
    NetworkRequest,
    NetworkDiff,
    ResourceBundle,
    UiClick,
    PageNavigation,
    NewTabOpened,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::SessionStart,
        EventType::NetworkRequest,
        EventType::NetworkDiff,
        EventType::ResourceBundle,
        EventType::UiClick,
        EventType::PageNavigation,
        EventType::NewTabOpened,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "SESSION_START",
            EventType::NetworkRequest => "NETWORK_REQUEST",
            EventType::NetworkDiff => "NETWORK_DIFF",
            EventType::ResourceBundle => "RESOURCE_BUNDLE",
            EventType::UiClick => "UI_CLICK",
            EventType::PageNavigation => "PAGE_NAVIGATION",
            EventType::NewTabOpened => "NEW_TAB_OPENED",
        }
    }
}

/// One normalized record on the output queue.
///
/// Serializes to exactly `{"timestamp", "type", "data"}`; the session id is carried for routing
/// and is already part of `data` for every session-scoped kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapturedEvent {
    pub timestamp: DateTime<Local>,
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(skip)]
    pub session_id: Option<SessionId>,
    pub data: Value,
}

impl CapturedEvent {
    /// Stamp a record with the current capture time.
    pub fn now(kind: EventType, session_id: Option<SessionId>, data: Value) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            session_id,
            data,
        }
    }

    /// Line-delimited serialized form, without the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_to_timestamp_type_data_only() {
        let event = CapturedEvent::now(
            EventType::UiClick,
            Some(SessionId::tab(0)),
            json!({"session_id": "tab-0", "element_path": "div > button"}),
        );
        let value: Value = serde_json::from_str(&event.to_line().unwrap()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["type"], "UI_CLICK");
        assert_eq!(object["data"]["element_path"], "div > button");
        assert!(object["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn as_str_matches_serde_names() {
        for kind in EventType::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }
}

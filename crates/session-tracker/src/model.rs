use serde::Serialize;

/// Lifecycle of one tracked tab.
///
/// `Unattached` tabs already forward network and console events; only the click scanner is
/// missing. `Blocked` tabs show an internal page and forward nothing until they navigate away.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Unattached,
    Attached,
    Blocked,
    Detached,
}

impl TrackerState {
    pub fn forwards_events(self) -> bool {
        matches!(self, TrackerState::Unattached | TrackerState::Attached)
    }

    pub fn is_terminal(self) -> bool {
        self == TrackerState::Detached
    }
}

/// Point-in-time view of a tracker, as reported by [`crate::SessionRegistry::snapshot`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub session_id: String,
    pub target_id: String,
    pub url: String,
    pub state: TrackerState,
}

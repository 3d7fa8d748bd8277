//! Shared primitives for the devpipe capture pipeline.
//!
//! Everything that crosses a crate boundary lives here: session identifiers, the typed raw
//! events submitted by session trackers, and the [`CapturedEvent`] records that travel through
//! the output queue to the log writer.

pub mod event;
pub mod raw;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use event::{CapturedEvent, EventType};
pub use raw::{CallFrame, ConsoleMessage, FrameNavigated, Initiator, RequestSent};

/// Identifier of one monitored tab, stable for the lifetime of its tracker.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Session id for the `index`-th tab discovered in this monitoring session.
    pub fn tab(index: usize) -> Self {
        Self(format!("tab-{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

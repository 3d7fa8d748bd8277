//! Per-tab listener lifecycle for devpipe.
//!
//! A [`SessionTracker`] binds one browser tab to a devpipe session id: it enables event delivery,
//! injects the click scanner, re-injects after main-frame navigations and forwards the tab's raw
//! events into the pipeline inputs. The [`SessionRegistry`] discovers tabs, follows new ones in
//! multi-tab mode and routes adapter events to the owning tracker.

pub mod config;
pub mod errors;
pub mod inject;
pub mod model;
pub mod registry;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use config::TrackerConfig;
pub use errors::TrackerError;
pub use inject::click_scanner_script;
pub use model::{TrackerSnapshot, TrackerState};
pub use registry::SessionRegistry;
pub use tracker::{SessionTracker, TrackerContext};

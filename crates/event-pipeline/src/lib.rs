//! devpipe event pipeline.
//!
//! A single task owns all reduction state and turns the typed raw events submitted by session
//! trackers into [`CapturedEvent`](devpipe_core_types::CapturedEvent) records on one ordered
//! output queue. [`Monitor`] is the control surface operators drive: it toggles logging, selects
//! the active file and tears everything down.

pub mod click_limiter;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod switch;

pub use click_limiter::{ClickGate, ClickLimits, ClickRateLimiter};
pub use config::{ClickScope, PipelineConfig};
pub use errors::PipelineError;
pub use metrics::{register_metrics, DropReason, PipelineSnapshot, PipelineStats};
pub use monitor::{Monitor, MonitorSettings, MonitorStats};
pub use pipeline::{EventPipeline, LifecycleEvent, PipelineInputs};
pub use switch::LoggingSwitch;

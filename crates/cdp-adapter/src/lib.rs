//! Chromium DevTools Protocol adapter for devpipe.
//!
//! Connects to an already-running browser, decodes the CDP events the capture pipeline consumes
//! into typed [`RawEvent`]s and exposes the page operations session trackers need through
//! [`PageDriver`]. When the event stream ends the adapter restarts the transport and announces
//! the outage with [`RawEvent::Disconnected`] / [`RawEvent::Reconnected`].

pub mod adapter;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod metrics;
pub mod registry;
pub mod transport;
pub mod util;

pub use adapter::{event_bus, CdpAdapter, EventBus, EventStream};
pub use config::CdpConfig;
pub use driver::PageDriver;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::{ConsoleCall, NetworkRequest, RawEvent, TargetInfo};
pub use metrics::AdapterMetricsSnapshot;
pub use registry::{TargetContext, TargetRegistry};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
pub use util::{probe_browser, BrowserVersion};

use cdp_adapter::AdapterError;
use devpipe_core_types::SessionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("browser call failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("session {0} is detached")]
    Detached(SessionId),
    #[error("no browser page could be attached")]
    NoPages,
}

use thiserror::Error;

use devpipe_event_store::EsError;
use network_tap::TapError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tap(#[from] TapError),
    #[error(transparent)]
    Store(#[from] EsError),
    #[error("no log file is active")]
    NoActiveLog,
    #[error("output queue closed")]
    QueueClosed,
    #[error("pipeline task ended: {0}")]
    TaskEnded(String),
}

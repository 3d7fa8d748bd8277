//! Durable side of devpipe: the log writer draining the output queue into an append-only JSONL
//! file, plus the naming rules for capture files.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod path;
pub mod writer;

pub use config::LogCfg;
pub use errors::{EsError, EsErrorKind};
pub use metrics::{WriterMetrics, WriterSnapshot};
pub use path::{log_path, unique_path};
pub use writer::{LogWriter, WriterExit};

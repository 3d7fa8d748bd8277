use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Shared counters for the log writer, cheap to clone into every writer generation.
#[derive(Clone, Default)]
pub struct WriterMetrics {
    inner: Arc<WriterMetricsInner>,
}

#[derive(Default)]
struct WriterMetricsInner {
    lines_written: AtomicU64,
    bytes_written: AtomicU64,
    write_errors: AtomicU64,
    files_opened: AtomicU64,
    failed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WriterSnapshot {
    pub lines_written: u64,
    pub bytes_written: u64,
    pub write_errors: u64,
    pub files_opened: u64,
    pub failed: bool,
    pub last_error: Option<String>,
}

impl WriterMetrics {
    pub fn record_line(&self, bytes: usize) {
        self.inner.lines_written.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_written
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_open(&self) {
        self.inner.files_opened.fetch_add(1, Ordering::Relaxed);
        self.inner.failed.store(false, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.inner.write_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.failed.store(true, Ordering::Relaxed);
        *self.inner.last_error.lock() = Some(message.into());
    }

    pub fn has_failed(&self) -> bool {
        self.inner.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> WriterSnapshot {
        WriterSnapshot {
            lines_written: self.inner.lines_written.load(Ordering::Relaxed),
            bytes_written: self.inner.bytes_written.load(Ordering::Relaxed),
            write_errors: self.inner.write_errors.load(Ordering::Relaxed),
            files_opened: self.inner.files_opened.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            last_error: self.inner.last_error.lock().clone(),
        }
    }
}

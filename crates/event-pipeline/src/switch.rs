use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "logging is active" flag. While off, the pipeline drops everything it receives.
#[derive(Clone, Debug, Default)]
pub struct LoggingSwitch(Arc<AtomicBool>);

impl LoggingSwitch {
    pub fn start(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

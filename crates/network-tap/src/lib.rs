//! devpipe network tap.
//!
//! Reduces the raw request stream of every monitored session: document and API traffic is
//! fingerprinted and diffed against its first occurrence, bulk asset traffic is grouped into
//! debounced bundles.

pub mod bundler;
pub mod config;
pub mod differ;
pub mod fingerprint;
pub mod truncate;

use std::sync::Arc;

use devpipe_core_types::{RequestSent, SessionId};
use thiserror::Error;
use tokio::sync::mpsc;

pub use bundler::{bundle_key, ResourceBundle, ResourceBundler};
pub use config::TapConfig;
pub use differ::{CapturedPayload, ReferenceDiffer};
pub use fingerprint::{endpoint, fingerprint};
pub use truncate::{simplify_url, truncate_str, truncate_value, TruncateLimits};

/// Errors emitted by the tap surface.
#[derive(Debug, Error)]
pub enum TapError {
    #[error("request could not be serialised: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What happened to one request handed to [`NetworkTap::ingest`].
#[derive(Clone, Debug, PartialEq)]
pub enum TapOutcome {
    /// A record is ready to emit.
    Emit(CapturedPayload),
    /// Added to the session bundle; it will surface on the flush channel.
    Bundled,
    /// Identical repeat of a known endpoint.
    Suppressed,
}

/// Routes requests to the differ or the bundler by resource type.
pub struct NetworkTap {
    config: TapConfig,
    differ: ReferenceDiffer,
    bundler: Arc<ResourceBundler>,
}

impl NetworkTap {
    pub fn new(config: TapConfig) -> (Self, mpsc::UnboundedReceiver<ResourceBundle>) {
        let (bundler, flushed) = ResourceBundler::new(&config);
        let differ = ReferenceDiffer::new(config.clone());
        (
            Self {
                config,
                differ,
                bundler,
            },
            flushed,
        )
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    pub async fn ingest(&mut self, request: &RequestSent) -> Result<TapOutcome, TapError> {
        let resource_type = request.resource_type.as_deref().unwrap_or("Other");
        if self.config.is_bundled(resource_type) {
            self.bundler
                .add(&request.session_id, resource_type, &request.url)
                .await;
            return Ok(TapOutcome::Bundled);
        }

        let key = fingerprint(&request.session_id, &request.method, &request.url);
        Ok(match self.differ.record(&key, request)? {
            Some(payload) => TapOutcome::Emit(payload),
            None => TapOutcome::Suppressed,
        })
    }

    pub async fn flush(&self, session: &SessionId) -> Option<ResourceBundle> {
        self.bundler.flush(session).await
    }

    pub async fn flush_all(&self) -> Vec<ResourceBundle> {
        self.bundler.flush_all().await
    }

    /// Forget every diff baseline. Pending bundles are untouched; flush them first.
    pub fn reset_references(&mut self) {
        self.differ.reset();
    }

    pub fn reference_count(&self) -> usize {
        self.differ.reference_count()
    }

    pub fn bundler(&self) -> &Arc<ResourceBundler> {
        &self.bundler
    }
}

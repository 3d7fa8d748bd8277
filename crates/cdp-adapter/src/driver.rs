use async_trait::async_trait;
use serde_json::Value;

use crate::error::AdapterError;
use crate::events::TargetInfo;

/// Page-level operations the session trackers need from the browser.
///
/// Sessions are CDP session ids obtained from [`PageDriver::attach`].
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// All page targets currently open in the browser.
    async fn list_pages(&self) -> Result<Vec<TargetInfo>, AdapterError>;

    /// Open a tab and return its target id.
    async fn create_page(&self, url: &str) -> Result<String, AdapterError>;

    /// Attach with a flattened session and return the CDP session id.
    async fn attach(&self, target_id: &str) -> Result<String, AdapterError>;

    async fn detach(&self, cdp_session: &str) -> Result<(), AdapterError>;

    /// Enable the domains whose events feed the pipeline (network, console, navigation).
    async fn enable_domains(&self, cdp_session: &str) -> Result<(), AdapterError>;

    /// Evaluate a script in the page's main world and return its value.
    async fn evaluate(&self, cdp_session: &str, expression: &str) -> Result<Value, AdapterError>;
}

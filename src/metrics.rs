use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Register every component's collectors with the process-wide registry. Safe to call twice.
pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        cdp_adapter::metrics::register_metrics(registry);
        event_pipeline::register_metrics(registry);
    });
}

/// Prometheus text exposition of the global registry.
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&global_registry().gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_text_names_pipeline_and_cdp_families() {
        register_metrics();
        register_metrics();
        cdp_adapter::metrics::record_event();
        let text = render().unwrap();
        assert!(text.contains("devpipe_cdp_events_total"));
    }
}

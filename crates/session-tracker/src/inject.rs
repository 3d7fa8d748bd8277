//! The in-page click scanner.
//!
//! The script reports trusted clicks (including ones inside open shadow roots and same-origin
//! iframes) by logging the marker followed by a JSON description of the clicked element: its
//! selector path, text, document URL and up to five links found beneath it. Failures while
//! describing the element are reported in `error` / `inner_content_error` instead of dropping
//! the click. It guards against double installation, so re-injecting into the same document is
//! harmless.

const SCANNER_TEMPLATE: &str = include_str!("scanner.js");
const MARKER_SLOT: &str = "__DEVPIPE_MARKER__";

/// Scanner source with `marker` embedded as a JS string literal.
pub fn click_scanner_script(marker: &str) -> String {
    // a JSON string is a valid JS string literal
    let literal = serde_json::Value::String(marker.to_string()).to_string();
    SCANNER_TEMPLATE.replace(MARKER_SLOT, &literal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_is_embedded_as_literal() {
        let script = click_scanner_script("__UI_SCANNER_DATA__");
        assert!(script.contains(r#"const MARKER = "__UI_SCANNER_DATA__";"#));
        assert!(!script.contains(MARKER_SLOT));
    }

    #[test]
    fn payload_carries_links_and_error_fields() {
        let script = click_scanner_script("__UI_SCANNER_DATA__");
        for field in [
            "result.element_path",
            "result.target_text",
            "result.document_url",
            "result.inner_content = innerLinks(target)",
            "result.inner_content_error = e.message",
            "result.error = e.message",
            "type: 'link'",
        ] {
            assert!(script.contains(field), "missing {field}");
        }
        assert!(script.contains("links.length < 5"));
    }

    #[test]
    fn quotes_in_marker_are_escaped() {
        let script = click_scanner_script(r#"x"y"#);
        assert!(script.contains(r#"const MARKER = "x\"y";"#));
    }
}

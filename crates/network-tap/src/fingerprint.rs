//! Stable endpoint keys for network requests.

use devpipe_core_types::SessionId;
use url::Url;

/// Key identifying a logical endpoint: `session::method::scheme://host/path`.
///
/// Query string and fragment never take part, so requests that only differ in parameters or
/// body share a fingerprint.
pub fn fingerprint(session: &SessionId, method: &str, url: &str) -> String {
    format!("{}::{}::{}", session, method, endpoint(url))
}

/// `scheme://host[:port]/path` for absolute URLs; anything unparseable is cut at the first `?`
/// or `#`.
pub fn endpoint(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => {
                let mut out = format!("{}://{}", parsed.scheme(), host);
                if let Some(port) = parsed.port() {
                    out.push(':');
                    out.push_str(&port.to_string());
                }
                out.push_str(parsed.path());
                out
            }
            None => format!("{}:{}", parsed.scheme(), parsed.path()),
        },
        Err(_) => raw
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

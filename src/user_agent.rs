//! User-Agent string for outgoing requests.

/// Default User-Agent (identifies the crate and its version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("transfer/{version} (http-request-engine)")
}

//! Shared User-Agent string for registry API and download traffic.
//!
//! crates.io rejects anonymous clients, so every request identifies the tool
//! and a contact URL (RFC 9308).

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/registry-mirror";

/// Default User-Agent for all mirror requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("registry-mirror/{version} (package-mirror; +{PROJECT_UA_URL})")
}

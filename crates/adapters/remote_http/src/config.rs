//! Remote platform connection configuration.

use serde::Deserialize;

/// Where the remote platform lives and how to authenticate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteHttpConfig {
    /// Base URL of the platform, e.g. `http://homeassistant.local:8123`.
    pub base_url: String,
    /// Long-lived bearer token.
    pub token: String,
    /// Transport-level timeout for one request, in milliseconds.
    ///
    /// The engine applies its own per-call timeout on top of this one.
    pub request_timeout_ms: u64,
}

impl Default for RemoteHttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8123".to_string(),
            token: String::new(),
            request_timeout_ms: 15_000,
        }
    }
}

//! Session configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a client can start with zero
//! configuration against a local development server.

use url::Url;

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the forum's realtime gateway.
    /// Env: `MURMUR_WS_URL`
    /// Default: `ws://127.0.0.1:5000/ws`
    pub ws_url: Url,

    /// Whether to fetch the inbox summary when the connection first
    /// comes up.
    /// Env: `MURMUR_FETCH_INBOX` (true/false)
    /// Default: `true`
    pub fetch_inbox_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ws_url: Url::parse("ws://127.0.0.1:5000/ws").expect("valid default URL"),
            fetch_inbox_on_connect: true,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("MURMUR_WS_URL") {
            match Url::parse(&raw) {
                Ok(url) => config.ws_url = url,
                Err(e) => tracing::warn!(value = %raw, error = %e, "Invalid MURMUR_WS_URL, using default"),
            }
        }

        if let Ok(raw) = std::env::var("MURMUR_FETCH_INBOX") {
            match raw.parse::<bool>() {
                Ok(flag) => config.fetch_inbox_on_connect = flag,
                Err(_) => {
                    tracing::warn!(value = %raw, "Invalid MURMUR_FETCH_INBOX, using default")
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SessionConfig::default();
        assert_eq!(config.ws_url.scheme(), "ws");
        assert!(config.fetch_inbox_on_connect);
    }
}

//! # Spoolman Engine Configuration
//!
//! Resolves the operator-supplied Spoolman base URL into the two endpoints the
//! engine talks to (the HTTP API base and the websocket event feed) and carries
//! the timing knobs for the connection and sync machinery.

use std::time::Duration;

use url::Url;

/// Errors raised while validating the engine configuration.
///
/// These are fatal at startup: a component cannot be constructed from a
/// configuration that fails to resolve.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configured Spoolman server URL could not be parsed.
    #[error("Invalid Spoolman server URL '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },
}

/// Configuration for the Spoolman synchronization engine.
#[derive(Debug, Clone)]
pub struct SpoolmanConfig {
    /// Base URL of the Spoolman instance. A bare `host[:port]` defaults to `http`.
    pub server: String,
    /// Minimum interval between usage flush attempts.
    pub sync_rate: Duration,
    /// Fixed delay applied after every disconnect before reconnecting.
    pub reconnect_delay: Duration,
    /// Bound on a single websocket connect attempt.
    pub connect_timeout: Duration,
    /// Interval between client keepalive probes on the stream.
    pub ping_interval: Duration,
    /// Probe silence after which the session is considered dead.
    pub ping_timeout: Duration,
    /// Request bound for the post-connect spool liveness check.
    pub check_request_timeout: Duration,
    /// Request bound for regular API calls (usage reports, proxied requests).
    pub request_timeout: Duration,
}

impl Default for SpoolmanConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            sync_rate: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(60),
            check_request_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// The two endpoints derived from one Spoolman base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrls {
    /// HTTP API base, e.g. `http://host:7912/api`. Versioned paths are appended verbatim.
    pub http_base: String,
    /// Websocket event feed, e.g. `ws://host:7912/api/v1/spool`.
    pub ws_url: String,
}

impl SpoolmanConfig {
    /// Splits the configured server URL into its scheme and host part,
    /// defaulting to `http` when no scheme is given.
    fn split_server(&self) -> (&'static str, &str) {
        let lower = self.server.to_ascii_lowercase();
        if lower.starts_with("https://") {
            ("https", &self.server["https://".len()..])
        } else if lower.starts_with("http://") {
            ("http", &self.server["http://".len()..])
        } else {
            ("http", self.server.as_str())
        }
    }

    /// Resolves the configured server into the HTTP base and the streaming
    /// endpoint, choosing `wss` exactly when the HTTP side is `https`.
    pub fn resolve_urls(&self) -> Result<ResolvedUrls, ConfigError> {
        let (scheme, host) = self.split_server();
        let host = host.trim_end_matches('/');
        if host.is_empty() {
            return Err(ConfigError::InvalidServerUrl {
                url: self.server.clone(),
                reason: "missing host".into(),
            });
        }
        // Validate through the url crate; the endpoints themselves are built
        // by concatenation so a host with an embedded base path survives.
        let parsed = Url::parse(&format!("{scheme}://{host}")).map_err(|e| {
            ConfigError::InvalidServerUrl {
                url: self.server.clone(),
                reason: e.to_string(),
            }
        })?;
        if parsed.host_str().is_none() {
            return Err(ConfigError::InvalidServerUrl {
                url: self.server.clone(),
                reason: "missing host".into(),
            });
        }
        let ws_scheme = if scheme == "https" { "wss" } else { "ws" };
        Ok(ResolvedUrls {
            http_base: format!("{scheme}://{host}/api"),
            ws_url: format!("{ws_scheme}://{host}/api/v1/spool"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(server: &str) -> SpoolmanConfig {
        SpoolmanConfig {
            server: server.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_plain_http() {
        let urls = config_for("http://spoolman.local:7912").resolve_urls().unwrap();
        assert_eq!(urls.http_base, "http://spoolman.local:7912/api");
        assert_eq!(urls.ws_url, "ws://spoolman.local:7912/api/v1/spool");
    }

    #[test]
    fn test_resolve_https_picks_wss() {
        let urls = config_for("https://spoolman.example.com").resolve_urls().unwrap();
        assert_eq!(urls.http_base, "https://spoolman.example.com/api");
        assert_eq!(urls.ws_url, "wss://spoolman.example.com/api/v1/spool");
    }

    #[test]
    fn test_resolve_bare_host_defaults_to_http() {
        let urls = config_for("192.168.1.50:7912").resolve_urls().unwrap();
        assert_eq!(urls.http_base, "http://192.168.1.50:7912/api");
        assert_eq!(urls.ws_url, "ws://192.168.1.50:7912/api/v1/spool");
    }

    #[test]
    fn test_resolve_strips_trailing_slashes() {
        let urls = config_for("HTTP://spoolman.local/").resolve_urls().unwrap();
        assert_eq!(urls.http_base, "http://spoolman.local/api");
    }

    #[test]
    fn test_resolve_keeps_base_path() {
        let urls = config_for("http://host/spoolman").resolve_urls().unwrap();
        assert_eq!(urls.http_base, "http://host/spoolman/api");
        assert_eq!(urls.ws_url, "ws://host/spoolman/api/v1/spool");
    }

    #[test]
    fn test_resolve_rejects_empty() {
        assert!(config_for("").resolve_urls().is_err());
        assert!(config_for("http://").resolve_urls().is_err());
    }
}

//! Client configuration
//!
//! [`ClientConfig`] carries everything a [`SessionController`](super::SessionController)
//! needs besides its collaborators: where the backend and the room service live,
//! HTTP client settings, event channel sizing, and the two late-join summary
//! delivery switches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        ClientConfig          │
//! │  backend_url ────────────────┼── token / transfer / summary services
//! │  transport_url ──────────────┼── room service
//! │  http_timeout_secs           │
//! │  user_agent                  │
//! │  event_channel_capacity      │
//! │  replay_summary_on_join      │  push: members replay the standing summary
//! │  recover_summary_on_join     │  pull: joiner asks the backend
//! └──────────────────────────────┘
//! ```
//!
//! # Usage Examples
//!
//! ```rust
//! use warmline_client_core::client::ClientConfig;
//!
//! let config = ClientConfig::new()
//!     .with_backend_url("http://backend.internal:8000")
//!     .with_transport_url("wss://rooms.example.com")
//!     .with_http_timeout_secs(5);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.http_timeout_secs, 5);
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Default backend base URL
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Default room service URL
pub const DEFAULT_TRANSPORT_URL: &str = "ws://localhost:7880";

/// Environment variable overriding [`ClientConfig::backend_url`]
pub const ENV_BACKEND_URL: &str = "WARMLINE_BACKEND_URL";

/// Environment variable overriding [`ClientConfig::transport_url`]
pub const ENV_TRANSPORT_URL: &str = "WARMLINE_TRANSPORT_URL";

/// Environment variable overriding [`ClientConfig::http_timeout_secs`]
pub const ENV_HTTP_TIMEOUT_SECS: &str = "WARMLINE_HTTP_TIMEOUT_SECS";

/// Configuration for a warm transfer client
///
/// # Default Values
///
/// - **Backend URL**: `http://localhost:8000`
/// - **Transport URL**: `ws://localhost:7880`
/// - **HTTP timeout**: 10 seconds
/// - **User agent**: `warmline/<crate version>`
/// - **Event channel capacity**: 256
/// - **Replay summary on join**: enabled
/// - **Recover summary on join**: enabled
///
/// ```rust
/// use warmline_client_core::client::ClientConfig;
///
/// let config = ClientConfig::default();
/// assert_eq!(config.backend_url, "http://localhost:8000");
/// assert_eq!(config.event_channel_capacity, 256);
/// assert!(config.replay_summary_on_join);
/// assert!(config.recover_summary_on_join);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the token, transfer and summary services
    pub backend_url: String,
    /// URL handed to the transport connector
    pub transport_url: String,
    /// Overall timeout of each backend HTTP request
    pub http_timeout_secs: u64,
    /// User agent sent with backend requests
    pub user_agent: String,
    /// Capacity of the session event broadcast channel
    pub event_channel_capacity: usize,
    /// Re-broadcast the standing summary whenever a participant joins
    pub replay_summary_on_join: bool,
    /// Ask the backend for a stored summary after joining
    pub recover_summary_on_join: bool,
}

impl ClientConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            transport_url: DEFAULT_TRANSPORT_URL.to_string(),
            http_timeout_secs: 10,
            user_agent: format!("warmline/{}", env!("CARGO_PKG_VERSION")),
            event_channel_capacity: 256,
            replay_summary_on_join: true,
            recover_summary_on_join: true,
        }
    }

    /// Defaults overlaid with `WARMLINE_*` environment variables
    ///
    /// Reads [`ENV_BACKEND_URL`], [`ENV_TRANSPORT_URL`] and
    /// [`ENV_HTTP_TIMEOUT_SECS`]. A timeout that is not a number is a
    /// configuration error rather than being silently ignored.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientResult<Self> {
        let mut config = Self::new();
        if let Some(url) = lookup(ENV_BACKEND_URL) {
            config.backend_url = url;
        }
        if let Some(url) = lookup(ENV_TRANSPORT_URL) {
            config.transport_url = url;
        }
        if let Some(raw) = lookup(ENV_HTTP_TIMEOUT_SECS) {
            config.http_timeout_secs = raw.trim().parse().map_err(|_| {
                ClientError::configuration(format!("{} must be a number of seconds, got {:?}", ENV_HTTP_TIMEOUT_SECS, raw))
            })?;
        }
        Ok(config)
    }

    /// Set the backend base URL
    ///
    /// ```rust
    /// use warmline_client_core::client::ClientConfig;
    ///
    /// let config = ClientConfig::new().with_backend_url("https://api.example.com/warm");
    /// assert_eq!(config.backend_url, "https://api.example.com/warm");
    /// ```
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    /// Set the room service URL
    pub fn with_transport_url(mut self, url: impl Into<String>) -> Self {
        self.transport_url = url.into();
        self
    }

    /// Set the backend HTTP timeout
    pub fn with_http_timeout_secs(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    /// Set the user agent sent to the backend
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the session event channel capacity
    ///
    /// Subscribers that fall further behind than this lose the oldest events.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Enable or disable replaying the standing summary to joiners
    ///
    /// ```rust
    /// use warmline_client_core::client::ClientConfig;
    ///
    /// // Rely on backend recovery alone
    /// let config = ClientConfig::new().with_summary_replay(false);
    /// assert!(!config.replay_summary_on_join);
    /// assert!(config.recover_summary_on_join);
    /// ```
    pub fn with_summary_replay(mut self, enabled: bool) -> Self {
        self.replay_summary_on_join = enabled;
        self
    }

    /// Enable or disable asking the backend for a stored summary on join
    pub fn with_summary_recovery(mut self, enabled: bool) -> Self {
        self.recover_summary_on_join = enabled;
        self
    }

    /// Check the configuration for values that cannot work
    ///
    /// ```rust
    /// use warmline_client_core::client::ClientConfig;
    ///
    /// assert!(ClientConfig::new().with_backend_url("localhost:8000/").validate().is_err());
    /// assert!(ClientConfig::new().with_http_timeout_secs(0).validate().is_err());
    /// ```
    pub fn validate(&self) -> ClientResult<()> {
        let backend = Url::parse(&self.backend_url)
            .map_err(|e| ClientError::configuration(format!("invalid backend url {:?}: {}", self.backend_url, e)))?;
        if !matches!(backend.scheme(), "http" | "https") {
            return Err(ClientError::configuration(format!(
                "backend url must be http or https, got {:?}",
                self.backend_url
            )));
        }
        Url::parse(&self.transport_url)
            .map_err(|e| ClientError::configuration(format!("invalid transport url {:?}: {}", self.transport_url, e)))?;

        if self.http_timeout_secs == 0 {
            return Err(ClientError::configuration("http_timeout_secs must be greater than zero"));
        }
        if self.event_channel_capacity == 0 {
            return Err(ClientError::configuration("event_channel_capacity must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport_url, "ws://localhost:7880");
        assert_eq!(config.http_timeout_secs, 10);
        assert!(config.user_agent.starts_with("warmline/"));
    }

    #[test]
    fn test_env_overlay() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_BACKEND_URL, "https://backend.example.com"),
            (ENV_HTTP_TIMEOUT_SECS, " 30 "),
        ]))
        .unwrap();

        assert_eq!(config.backend_url, "https://backend.example.com");
        assert_eq!(config.transport_url, DEFAULT_TRANSPORT_URL);
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_env_bad_timeout() {
        let err = ClientConfig::from_lookup(lookup(&[(ENV_HTTP_TIMEOUT_SECS, "soon")])).unwrap_err();
        assert!(matches!(err, ClientError::Configuration { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(ClientConfig::new().with_transport_url("::nope").validate().is_err());
        assert!(ClientConfig::new().with_backend_url("ftp://files").validate().is_err());
        assert!(ClientConfig::new().with_event_channel_capacity(0).validate().is_err());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"backend_url": "http://10.0.0.5:8000"}"#).unwrap();
        assert_eq!(config.backend_url, "http://10.0.0.5:8000");
        assert_eq!(config.event_channel_capacity, 256);
    }
}

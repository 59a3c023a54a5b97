//! Client builder for creating session controllers
//!
//! [`ClientBuilder`] assembles a [`SessionController`] from a [`ClientConfig`]
//! and its two external collaborators: the backend (token, transfer and
//! summary services) and the room transport. The backend defaults to
//! [`HttpBackend`] built from the configuration; the transport has no default
//! and must be supplied.
//!
//! # Examples
//!
//! ## Basic Setup
//!
//! ```rust
//! use warmline_client_core::{ClientBuilder, LoopbackHub};
//!
//! let controller = ClientBuilder::new()
//!     .backend_url("http://localhost:8000")
//!     .connector(LoopbackHub::new())
//!     .build()
//!     .expect("Failed to build client");
//!
//! assert_eq!(controller.status().to_string(), "Not connected");
//! ```
//!
//! ## Configuration From The Environment
//!
//! ```rust,no_run
//! use warmline_client_core::{ClientBuilder, ClientConfig, LoopbackHub};
//!
//! let controller = ClientBuilder::new()
//!     .config(ClientConfig::from_env()?)
//!     .summary_replay(false)
//!     .connector(LoopbackHub::new())
//!     .build()?;
//! # Ok::<(), warmline_client_core::ClientError>(())
//! ```

use std::sync::Arc;

use super::config::ClientConfig;
use super::controller::SessionController;
use crate::backend::{BackendApi, HttpBackend};
use crate::error::{ClientError, ClientResult};
use crate::transport::TransportConnector;

/// Fluent builder for [`SessionController`]
///
/// All configuration methods consume and return the builder. Configuration is
/// validated in [`build`](ClientBuilder::build).
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    backend: Option<Arc<dyn BackendApi>>,
    connector: Option<Arc<dyn TransportConnector>>,
}

impl ClientBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the backend base URL
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    /// Set the room service URL
    pub fn transport_url(mut self, url: impl Into<String>) -> Self {
        self.config.transport_url = url.into();
        self
    }

    /// Set the backend HTTP timeout
    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    /// Set the user agent sent to the backend
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the session event channel capacity
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// Enable or disable replaying the standing summary to joiners
    pub fn summary_replay(mut self, enabled: bool) -> Self {
        self.config.replay_summary_on_join = enabled;
        self
    }

    /// Enable or disable backend summary recovery on join
    pub fn summary_recovery(mut self, enabled: bool) -> Self {
        self.config.recover_summary_on_join = enabled;
        self
    }

    /// Use a custom backend instead of [`HttpBackend`]
    pub fn backend(mut self, backend: impl BackendApi + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Use an already shared backend
    pub fn shared_backend(mut self, backend: Arc<dyn BackendApi>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the room transport
    pub fn connector(mut self, connector: impl TransportConnector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Use an already shared room transport
    pub fn shared_connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Validate the configuration and build the controller
    pub fn build(self) -> ClientResult<SessionController> {
        self.config.validate()?;
        let connector = self
            .connector
            .ok_or_else(|| ClientError::configuration("no transport connector configured"))?;
        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::from_config(&self.config)?),
        };
        Ok(SessionController::new(self.config, backend, connector))
    }
}

//! Real-time room transport abstraction
//!
//! The media/data transport is an external service. This module defines the
//! capabilities the session layer consumes from it:
//!
//! - [`TransportConnector::connect`] joins a room with an access credential
//!   and returns a [`TransportSession`]: the live [`RoomConnection`], the
//!   receiving end of its [`TransportEvent`] channel, and the identities
//!   already present in the room.
//! - [`RoomConnection::broadcast`] fans a payload out to every other member.
//! - [`RoomConnection::disconnect`] leaves the room.
//!
//! Membership and inbound data arrive as [`TransportEvent`]s, in the order the
//! transport delivered them. Redelivery of join/leave events is allowed.
//!
//! [`loopback::LoopbackHub`] is an in-process implementation used by the tests
//! and for running several clients in one process.

pub mod grant;
pub mod loopback;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::ClientResult;

pub use grant::AccessGrant;
pub use loopback::LoopbackHub;

/// Delivery options for a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOptions {
    /// Request eventual delivery to every connected member
    pub reliable: bool,
}

impl BroadcastOptions {
    /// Reliable delivery
    pub fn reliable() -> Self {
        Self { reliable: true }
    }

    /// Best-effort delivery
    pub fn lossy() -> Self {
        Self { reliable: false }
    }
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self::reliable()
    }
}

/// Events delivered by a room connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote participant connected
    ParticipantJoined { identity: String },
    /// A remote participant disconnected
    ParticipantLeft { identity: String },
    /// Data was broadcast by another member
    MessageReceived {
        /// Raw payload bytes
        payload: Bytes,
        /// Identity the transport attributes the data to, if known
        origin: Option<String>,
    },
    /// The transport dropped this connection
    Disconnected { reason: String },
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::ParticipantJoined { identity } => write!(f, "participant joined: {}", identity),
            TransportEvent::ParticipantLeft { identity } => write!(f, "participant left: {}", identity),
            TransportEvent::MessageReceived { payload, origin } => write!(
                f,
                "message received: {} bytes from {}",
                payload.len(),
                origin.as_deref().unwrap_or("<unknown>")
            ),
            TransportEvent::Disconnected { reason } => write!(f, "disconnected: {}", reason),
        }
    }
}

/// A live connection to one room
#[async_trait]
pub trait RoomConnection: Send + Sync + fmt::Debug {
    /// Identity this connection was admitted with
    fn local_identity(&self) -> &str;

    /// Room this connection belongs to
    fn room(&self) -> &str;

    /// Send a payload to every other member of the room
    async fn broadcast(&self, payload: Bytes, options: BroadcastOptions) -> ClientResult<()>;

    /// Leave the room; calling it again is a no-op
    async fn disconnect(&self) -> ClientResult<()>;
}

/// Result of a successful connect
pub struct TransportSession {
    /// The live connection
    pub connection: Arc<dyn RoomConnection>,
    /// Join, leave, data and disconnect events for this connection
    pub events: mpsc::Receiver<TransportEvent>,
    /// Identities already in the room when the connection was made, in join order
    pub remote_participants: Vec<String>,
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("connection", &self.connection)
            .field("remote_participants", &self.remote_participants)
            .finish()
    }
}

/// Factory for room connections
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect to the room named in `credential`
    async fn connect(&self, url: &str, credential: &str) -> ClientResult<TransportSession>;
}

//! # Warmline Client Core
//!
//! Client-side orchestration for warm call transfer: a live agent hands a call
//! to a second agent, together with a context summary, without dropping the
//! caller.
//!
//! Media and data delivery belong to an external room service, and token
//! issuance and summarization belong to an HTTP backend. This crate
//! coordinates what happens between them:
//!
//! - [`participant`] - who is in the room
//! - [`bus`] - reliable note fan-out, and summary delivery to late joiners
//! - [`transfer`] - the handoff protocol and the "confirm transfer & leave" gate
//! - [`client`] - join/leave lifecycle tying it all to the transport
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warmline_client_core::{ClientBuilder, LoopbackHub, SessionEvent};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = ClientBuilder::new()
//!         .backend_url("http://localhost:8000")
//!         .connector(LoopbackHub::new())
//!         .build()?;
//!
//!     let mut events = controller.subscribe();
//!     controller.join("support-42", "agent-a").await?;
//!     controller.request_transfer("agent-b", "").await?;
//!
//!     while let Some(Ok(event)) = events.next().await {
//!         if let SessionEvent::ConfirmGateChanged { enabled: true, .. } = event {
//!             controller.confirm_transfer_and_leave().await?;
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod bus;
pub mod client;
pub mod error;
pub mod events;
pub mod logging;
pub mod message;
pub mod participant;
pub mod session;
pub mod transfer;
pub mod transport;

// Re-export main types
pub use backend::{BackendApi, HttpBackend};
pub use bus::MessageBus;
pub use client::{ClientBuilder, ClientConfig, SessionController};
pub use error::{ClientError, ClientResult, ErrorCategory};
pub use events::{
    EventEmitter, EventFilter, EventKind, EventPriority, EventStream, EventSubscription, RosterChange,
    SessionEvent, SessionEventHandler, SubscriptionHandle,
};
pub use logging::{parse_log_level, setup_logging, LogFormat, LoggingConfig};
pub use message::{Note, NoteLog, NoteOrigin, NotePayload, CONTEXT_SUMMARY_PREFIX};
pub use participant::{Participant, ParticipantRegistry};
pub use session::{Session, SessionId, SessionStatus, StandingSummary, SummarySource};
pub use transfer::{SummaryHint, TransferCoordinator, TransferOutcome, TransferRequest, TransferResult, TransferState};
pub use transport::{
    AccessGrant, BroadcastOptions, LoopbackHub, RoomConnection, TransportConnector, TransportEvent, TransportSession,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

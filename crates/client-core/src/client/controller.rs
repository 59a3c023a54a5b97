//! Session lifecycle
//!
//! [`SessionController`] is the entry point for a presentation layer. It joins
//! and leaves rooms, pumps transport events into the session, and exposes the
//! session's observable state plus the warm transfer actions.
//!
//! Join and leave are serialized. At most one session is active per
//! controller; run several controllers for several rooms, they share nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use warmline_client_core::{ClientBuilder, LoopbackHub};
//!
//! # async fn example() -> warmline_client_core::ClientResult<()> {
//! let controller = ClientBuilder::new()
//!     .backend_url("http://localhost:8000")
//!     .connector(LoopbackHub::new())
//!     .build()?;
//!
//! controller.join("room1", "agent-a").await?;
//! controller.send_note("caller asked about a refund").await?;
//!
//! let result = controller.request_transfer("agent-b", "auto").await?;
//! println!("token for agent-b: {}", result.token);
//!
//! // Enabled once agent-b is in the room
//! if controller.confirm_enabled() {
//!     controller.confirm_transfer_and_leave().await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::ClientConfig;
use crate::backend::BackendApi;
use crate::bus::MessageBus;
use crate::error::{ClientError, ClientResult};
use crate::events::{EventEmitter, EventStream, EventSubscription, SessionEvent, SubscriptionHandle};
use crate::message::Note;
use crate::session::{Session, SessionId, SessionStatus, StandingSummary};
use crate::transfer::{TransferCoordinator, TransferResult, TransferState, MISSING_TRANSFER_INPUT};
use crate::transport::{RoomConnection, TransportConnector, TransportEvent, TransportSession};

/// Message returned when join is called without a room or identity
pub const MISSING_JOIN_INPUT: &str = "Please enter room name and identity.";

/// Everything that exists only while a room is joined
#[derive(Debug)]
struct ActiveSession {
    session: Arc<Session>,
    bus: Arc<MessageBus>,
    transfer: Arc<TransferCoordinator>,
    connection: Arc<dyn RoomConnection>,
    pump: Mutex<Option<SubscriptionHandle>>,
}

struct ControllerInner {
    config: ClientConfig,
    backend: Arc<dyn BackendApi>,
    connector: Arc<dyn TransportConnector>,
    events: EventEmitter,
    status: RwLock<SessionStatus>,
    active: RwLock<Option<Arc<ActiveSession>>>,
    lifecycle: tokio::sync::Mutex<()>,
}

/// Top-level warm transfer client
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("status", &*self.inner.status.read())
            .field("room", &self.room())
            .finish()
    }
}

impl SessionController {
    /// Create a controller from its collaborators
    ///
    /// Most callers go through [`ClientBuilder`](super::ClientBuilder).
    pub fn new(config: ClientConfig, backend: Arc<dyn BackendApi>, connector: Arc<dyn TransportConnector>) -> Self {
        let events = EventEmitter::new(config.event_channel_capacity);
        Self {
            inner: Arc::new(ControllerInner {
                config,
                backend,
                connector,
                events,
                status: RwLock::new(SessionStatus::NotConnected),
                active: RwLock::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Emitter carrying every event of every session this controller runs
    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    /// Stream of session events
    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    /// Register an event handler; it is removed when the handle is dropped
    pub fn subscribe_handler(&self, subscription: EventSubscription) -> SubscriptionHandle {
        self.inner.events.subscribe_handler(subscription)
    }

    // ===== Lifecycle =====

    /// Join `room` as `identity`
    ///
    /// Requests a credential, connects, registers the local participant and
    /// anyone already present, starts consuming transport events, then asks the
    /// backend for a stored summary. Any failure leaves the controller in
    /// `Error` with nothing retained; the caller may simply try again.
    pub async fn join(&self, room: &str, identity: &str) -> ClientResult<()> {
        let room = room.trim();
        let identity = identity.trim();
        if room.is_empty() || identity.is_empty() {
            return Err(ClientError::validation(MISSING_JOIN_INPUT));
        }

        let _lifecycle = self.inner.lifecycle.lock().await;
        if let Some(active) = self.active() {
            return Err(ClientError::invalid_state(format!(
                "already joined room {}; leave it first",
                active.session.room()
            )));
        }

        self.inner.set_status(SessionStatus::Connecting, Some(room));
        let active = match self.establish(room, identity).await {
            Ok(active) => active,
            Err(e) => {
                warn!(room, identity, error = %e, "join failed");
                self.inner.set_status(SessionStatus::Error(e.to_string()), Some(room));
                return Err(e);
            }
        };

        if self.inner.config.recover_summary_on_join {
            active.bus.recover_standing_summary(self.inner.backend.as_ref()).await;
        }

        info!(
            room,
            identity = %active.session.local_identity(),
            session_id = %active.session.id(),
            members = active.session.members().len(),
            "joined room"
        );
        self.inner.set_status(SessionStatus::Connected, Some(room));
        Ok(())
    }

    async fn establish(&self, room: &str, identity: &str) -> ClientResult<Arc<ActiveSession>> {
        let inner = &self.inner;
        let token = inner.backend.issue_token(room, identity).await?;
        let TransportSession {
            connection,
            events,
            remote_participants,
        } = inner.connector.connect(&inner.config.transport_url, &token).await?;

        let session = Arc::new(Session::open(room, connection.local_identity(), inner.events.clone()));
        for participant in &remote_participants {
            session.on_remote_join(participant);
        }

        let bus = Arc::new(MessageBus::new(
            session.clone(),
            connection.clone(),
            inner.config.replay_summary_on_join,
        ));
        let transfer = Arc::new(TransferCoordinator::new(session.id(), inner.events.clone()));
        transfer.on_roster_changed(session.has_remote_party());

        let active = Arc::new(ActiveSession {
            session,
            bus,
            transfer,
            connection,
            pump: Mutex::new(None),
        });
        let pump = spawn_event_pump(Arc::downgrade(inner), active.clone(), events);
        *active.pump.lock() = Some(pump);
        *inner.active.write() = Some(active.clone());
        Ok(active)
    }

    /// Leave the current room
    ///
    /// Stops event processing, clears the roster and note log, resets the
    /// transfer state and disconnects. A no-op when nothing is joined.
    pub async fn leave(&self) -> ClientResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let taken = self.inner.active.write().take();
        let Some(active) = taken else {
            debug!("leave with no active session");
            return Ok(());
        };

        let pump = active.pump.lock().take();
        if let Some(pump) = pump {
            pump.cancel();
        }
        let room = active.session.room().to_string();
        active.session.close();
        active.transfer.reset();
        if let Err(e) = active.connection.disconnect().await {
            warn!(room = %room, error = %e, "transport disconnect failed");
        }

        info!(room = %room, session_id = %active.session.id(), "left room");
        self.inner.set_status(SessionStatus::Left, Some(&room));
        Ok(())
    }

    // ===== Notes =====

    /// Send a chat note to the room
    pub async fn send_note(&self, text: &str) -> ClientResult<Note> {
        if text.trim().is_empty() {
            return Err(ClientError::validation("Message text is empty."));
        }
        let active = self.active().ok_or_else(|| ClientError::invalid_state("not connected to a room"))?;
        active.bus.publish(text).await
    }

    // ===== Transfer =====

    /// Hand the call to `target`
    ///
    /// `summary_hint` is the summary typed by the user; blank or `auto` asks the
    /// backend to write one from the transcript.
    pub async fn request_transfer(&self, target: &str, summary_hint: &str) -> ClientResult<TransferResult> {
        let Some(active) = self.active() else {
            return Err(ClientError::validation(MISSING_TRANSFER_INPUT));
        };
        active
            .transfer
            .request_transfer(&active.bus, self.inner.backend.as_ref(), target, summary_hint)
            .await
    }

    /// Leave the room after a confirmed handoff
    ///
    /// Only available while [`confirm_enabled`](Self::confirm_enabled) is true.
    pub async fn confirm_transfer_and_leave(&self) -> ClientResult<()> {
        if !self.confirm_enabled() {
            return Err(ClientError::transfer(
                "transfer cannot be confirmed until it has completed and the target has joined",
            ));
        }
        self.leave().await
    }

    /// Whether "confirm transfer & leave" is available
    pub fn confirm_enabled(&self) -> bool {
        self.active().map(|a| a.transfer.confirm_enabled()).unwrap_or(false)
    }

    pub fn transfer_state(&self) -> TransferState {
        self.active().map(|a| a.transfer.state()).unwrap_or(TransferState::Idle)
    }

    /// Result of the last successful transfer in this session
    pub fn last_transfer_result(&self) -> Option<TransferResult> {
        self.active().and_then(|a| a.transfer.last_result())
    }

    /// Error message of the last failed transfer in this session
    pub fn last_transfer_error(&self) -> Option<String> {
        self.active().and_then(|a| a.transfer.last_error())
    }

    // ===== Observable state =====

    pub fn status(&self) -> SessionStatus {
        self.inner.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.active().is_some()
    }

    pub fn room(&self) -> Option<String> {
        self.active().map(|a| a.session.room().to_string())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.active().map(|a| a.session.id())
    }

    pub fn local_identity(&self) -> Option<String> {
        self.active().map(|a| a.session.local_identity().to_string())
    }

    /// Room members in join order; empty when not joined
    pub fn participants(&self) -> Vec<String> {
        self.active().map(|a| a.session.members()).unwrap_or_default()
    }

    /// Note log in order; empty when not joined
    pub fn notes(&self) -> Vec<Note> {
        self.active().map(|a| a.session.notes()).unwrap_or_default()
    }

    /// Note log as `sender: text` lines
    pub fn transcript(&self) -> String {
        self.active().map(|a| a.session.transcript()).unwrap_or_default()
    }

    pub fn standing_summary(&self) -> Option<StandingSummary> {
        self.active().and_then(|a| a.session.standing_summary())
    }

    fn active(&self) -> Option<Arc<ActiveSession>> {
        self.inner.active.read().clone()
    }
}

impl ControllerInner {
    fn set_status(&self, status: SessionStatus, room: Option<&str>) {
        let previous = std::mem::replace(&mut *self.status.write(), status.clone());
        if previous == status {
            return;
        }
        debug!(from = %previous, to = %status, "status changed");
        self.events.emit(SessionEvent::StatusChanged {
            previous,
            status,
            room: room.map(str::to_string),
        });
    }

    /// Tear down after the transport dropped the session
    async fn on_transport_disconnected(&self, session_id: SessionId, reason: String) {
        let _lifecycle = self.lifecycle.lock().await;
        let active = {
            let mut slot = self.active.write();
            let current = slot.as_ref().map(|a| a.session.id() == session_id).unwrap_or(false);
            if current {
                slot.take()
            } else {
                None
            }
        };
        let Some(active) = active else {
            debug!(%session_id, "disconnect for a session that is no longer active");
            return;
        };

        // Called from the pump itself; let it finish instead of aborting it
        let pump = active.pump.lock().take();
        if let Some(pump) = pump {
            pump.detach();
        }
        let room = active.session.room().to_string();
        active.session.close();
        active.transfer.reset();

        warn!(room = %room, %session_id, reason = %reason, "disconnected by transport");
        self.set_status(SessionStatus::Disconnected(reason), Some(&room));
    }
}

/// Feed transport events into the session until it ends
fn spawn_event_pump(
    controller: Weak<ControllerInner>,
    active: Arc<ActiveSession>,
    mut events: mpsc::Receiver<TransportEvent>,
) -> SubscriptionHandle {
    let session_id = active.session.id();
    let task = tokio::spawn(async move {
        let local_identity = active.session.local_identity().to_string();
        let reason = loop {
            let Some(event) = events.recv().await else {
                break "transport closed".to_string();
            };
            debug!(%session_id, %event, "transport event");
            match event {
                TransportEvent::ParticipantJoined { identity } => {
                    let update = active.session.on_remote_join(&identity);
                    active.transfer.on_roster_changed(update.has_remote_party);
                    // Redelivered joins do not trigger another replay
                    if update.changed && identity != local_identity {
                        active.bus.on_participant_joined(&identity).await;
                    }
                }
                TransportEvent::ParticipantLeft { identity } => {
                    let update = active.session.on_remote_leave(&identity);
                    active.transfer.on_roster_changed(update.has_remote_party);
                }
                TransportEvent::MessageReceived { payload, origin } => {
                    active.bus.on_receive(&payload, origin.as_deref());
                }
                TransportEvent::Disconnected { reason } => break reason,
            }
        };

        if active.session.is_closed() {
            return;
        }
        if let Some(controller) = controller.upgrade() {
            controller.on_transport_disconnected(session_id, reason).await;
        }
    });
    SubscriptionHandle::new(session_id, task)
}

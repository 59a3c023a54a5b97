//! Event handling for client-core operations
//!
//! Every observable state transition of a session is published as a
//! [`SessionEvent`]: status changes, roster changes, appended notes, standing
//! summary updates, transfer progress, and flips of the "confirm transfer &
//! leave" gate. Presentation layers react to these instead of polling.
//!
//! # Consuming Events
//!
//! There are two ways in:
//!
//! - **Streams** - [`EventEmitter::subscribe`] returns a `tokio-stream`
//!   [`EventStream`] that sees every event in emission order.
//! - **Handlers** - implement [`SessionEventHandler`], wrap it in an
//!   [`EventSubscription`] (optionally with an [`EventFilter`]) and register it
//!   with [`EventEmitter::subscribe_handler`]. The returned
//!   [`SubscriptionHandle`] unsubscribes when it is dropped, so a handler never
//!   outlives the scope that registered it.
//!
//! ## Handler Example
//!
//! ```rust
//! use warmline_client_core::events::{SessionEventHandler, EventSubscription, EventFilter, EventKind};
//! use warmline_client_core::message::Note;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct ChatPrinter;
//!
//! #[async_trait]
//! impl SessionEventHandler for ChatPrinter {
//!     async fn on_note(&self, note: Note) {
//!         println!("{}: {}", note.sender, note.text);
//!     }
//! }
//!
//! let subscription = EventSubscription::new(
//!     Arc::new(ChatPrinter),
//!     EventFilter::kinds([EventKind::NoteAppended]),
//! );
//! println!("Subscription ID: {}", subscription.id());
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::message::Note;
use crate::session::{SessionId, SessionStatus, StandingSummary};
use crate::transfer::{TransferResult, TransferState};

/// What changed in the roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    /// A participant joined
    Joined(String),
    /// A participant left
    Left(String),
    /// The roster was rebuilt or cleared (join, leave, disconnect)
    Reset,
}

/// Event priority levels for filtering and handling
///
/// ```rust
/// use warmline_client_core::events::EventPriority;
///
/// assert!(EventPriority::Critical > EventPriority::High);
/// assert!(EventPriority::High > EventPriority::Normal);
/// assert!(EventPriority::Normal > EventPriority::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    /// Routine updates (notes, roster churn)
    Low,
    /// State transitions
    Normal,
    /// Things a user should notice (transfer results, gate changes)
    High,
    /// Failures
    Critical,
}

/// Discriminant of [`SessionEvent`], used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChanged,
    RosterChanged,
    NoteAppended,
    StandingSummaryChanged,
    TransferStateChanged,
    TransferCompleted,
    ConfirmGateChanged,
    Warning,
}

/// Observable session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Controller status changed
    StatusChanged {
        /// Status before the change
        previous: SessionStatus,
        /// Status after the change
        status: SessionStatus,
        /// Room the status refers to, when there is one
        room: Option<String>,
    },
    /// Participant roster changed
    RosterChanged {
        /// Session the roster belongs to
        session_id: SessionId,
        /// Members after the change, in join order
        members: Vec<String>,
        /// What happened
        change: RosterChange,
    },
    /// A note was appended to the session log
    NoteAppended {
        /// Session the note belongs to
        session_id: SessionId,
        /// The stored note
        note: Note,
    },
    /// The standing summary was set or replaced
    StandingSummaryChanged {
        /// Session the summary belongs to
        session_id: SessionId,
        /// New standing summary
        summary: StandingSummary,
    },
    /// Transfer state machine moved
    TransferStateChanged {
        /// Session the transfer belongs to
        session_id: SessionId,
        /// State before the transition
        previous: TransferState,
        /// State after the transition
        state: TransferState,
    },
    /// A transfer produced a credential
    TransferCompleted {
        /// Session the transfer belongs to
        session_id: SessionId,
        /// Credential, summary and audio reference returned by the backend
        result: TransferResult,
    },
    /// The "confirm transfer & leave" gate flipped
    ConfirmGateChanged {
        /// Session the gate belongs to
        session_id: SessionId,
        /// Whether the action is now available
        enabled: bool,
    },
    /// A non-fatal failure that was downgraded instead of returned
    Warning {
        /// Session the warning belongs to, if any
        session_id: Option<SessionId>,
        /// What went wrong
        error: ClientError,
    },
}

impl SessionEvent {
    /// Get the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::StatusChanged { .. } => EventKind::StatusChanged,
            SessionEvent::RosterChanged { .. } => EventKind::RosterChanged,
            SessionEvent::NoteAppended { .. } => EventKind::NoteAppended,
            SessionEvent::StandingSummaryChanged { .. } => EventKind::StandingSummaryChanged,
            SessionEvent::TransferStateChanged { .. } => EventKind::TransferStateChanged,
            SessionEvent::TransferCompleted { .. } => EventKind::TransferCompleted,
            SessionEvent::ConfirmGateChanged { .. } => EventKind::ConfirmGateChanged,
            SessionEvent::Warning { .. } => EventKind::Warning,
        }
    }

    /// Get the priority of this event
    pub fn priority(&self) -> EventPriority {
        match self {
            SessionEvent::NoteAppended { .. } | SessionEvent::RosterChanged { .. } => EventPriority::Low,
            SessionEvent::StatusChanged { status, .. } => {
                if status.is_error() {
                    EventPriority::Critical
                } else {
                    EventPriority::Normal
                }
            }
            SessionEvent::StandingSummaryChanged { .. } | SessionEvent::TransferStateChanged { .. } => {
                EventPriority::Normal
            }
            SessionEvent::TransferCompleted { .. } | SessionEvent::ConfirmGateChanged { .. } => EventPriority::High,
            SessionEvent::Warning { .. } => EventPriority::Critical,
        }
    }

    /// Get the session this event refers to (if any)
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SessionEvent::StatusChanged { .. } => None,
            SessionEvent::RosterChanged { session_id, .. }
            | SessionEvent::NoteAppended { session_id, .. }
            | SessionEvent::StandingSummaryChanged { session_id, .. }
            | SessionEvent::TransferStateChanged { session_id, .. }
            | SessionEvent::TransferCompleted { session_id, .. }
            | SessionEvent::ConfirmGateChanged { session_id, .. } => Some(*session_id),
            SessionEvent::Warning { session_id, .. } => *session_id,
        }
    }

    /// Check if this event passes the given filter
    pub fn passes_filter(&self, filter: &EventFilter) -> bool {
        if let Some(min_priority) = filter.min_priority {
            if self.priority() < min_priority {
                return false;
            }
        }

        if let Some(kinds) = &filter.kinds {
            if !kinds.contains(&self.kind()) {
                return false;
            }
        }

        true
    }
}

/// Event filtering options
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only receive these kinds of events (None = all kinds)
    pub kinds: Option<HashSet<EventKind>>,
    /// Minimum event priority level (None = all priorities)
    pub min_priority: Option<EventPriority>,
}

impl EventFilter {
    /// Filter that only lets the given kinds through
    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            min_priority: None,
        }
    }

    /// Filter on a minimum priority
    pub fn min_priority(priority: EventPriority) -> Self {
        Self {
            kinds: None,
            min_priority: Some(priority),
        }
    }
}

/// Handler for session events
///
/// Every method has a no-op default; override the ones you care about.
/// [`on_session_event`](SessionEventHandler::on_session_event) receives every
/// delivered event and by default dispatches to the narrower hooks.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    /// Controller status changed
    async fn on_status_changed(&self, _previous: SessionStatus, _status: SessionStatus) {}

    /// Roster changed
    async fn on_roster_changed(&self, _members: Vec<String>) {}

    /// A note was appended
    async fn on_note(&self, _note: Note) {}

    /// A transfer produced a credential
    async fn on_transfer_completed(&self, _result: TransferResult) {}

    /// The confirm gate flipped
    async fn on_confirm_gate_changed(&self, _enabled: bool) {}

    /// Handle any event (optional - default dispatches to the hooks above)
    async fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::StatusChanged { previous, status, .. } => self.on_status_changed(previous, status).await,
            SessionEvent::RosterChanged { members, .. } => self.on_roster_changed(members).await,
            SessionEvent::NoteAppended { note, .. } => self.on_note(note).await,
            SessionEvent::TransferCompleted { result, .. } => self.on_transfer_completed(result).await,
            SessionEvent::ConfirmGateChanged { enabled, .. } => self.on_confirm_gate_changed(enabled).await,
            _ => {}
        }
    }
}

/// A handler paired with the filter deciding what it receives
pub struct EventSubscription {
    handler: Arc<dyn SessionEventHandler>,
    filter: EventFilter,
    id: uuid::Uuid,
}

impl EventSubscription {
    /// Create a new subscription
    pub fn new(handler: Arc<dyn SessionEventHandler>, filter: EventFilter) -> Self {
        Self {
            handler,
            filter,
            id: uuid::Uuid::new_v4(),
        }
    }

    /// Subscription that receives every event
    pub fn all_events(handler: Arc<dyn SessionEventHandler>) -> Self {
        Self::new(handler, EventFilter::default())
    }

    /// Get the subscription ID
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Check if this subscription should receive an event
    pub fn should_receive(&self, event: &SessionEvent) -> bool {
        event.passes_filter(&self.filter)
    }

    /// Deliver an event if it passes the filter
    pub async fn deliver_event(&self, event: SessionEvent) {
        if self.should_receive(&event) {
            self.handler.on_session_event(event).await;
        }
    }
}

impl Clone for EventSubscription {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            filter: self.filter.clone(),
            id: self.id,
        }
    }
}

/// Stream of session events
pub type EventStream = BroadcastStream<SessionEvent>;

/// Guard for a registered handler or background listener
///
/// Dropping the handle stops delivery. Use [`detach`](SubscriptionHandle::detach)
/// to let the task run on its own.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: uuid::Uuid,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: uuid::Uuid, task: JoinHandle<()>) -> Self {
        Self { id, task: Some(task) }
    }

    /// ID of the subscription this handle guards
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Whether the guarded task is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop delivery now
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Release the guard without stopping the task
    pub fn detach(mut self) {
        self.task.take();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Broadcast hub for session events
///
/// `emit` never blocks and never fails; events emitted while nobody listens are
/// dropped.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: SessionEvent) {
        debug!(kind = ?event.kind(), "session event");
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events as a stream
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Subscribe to events as a raw broadcast receiver
    pub fn receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Register a handler; delivery stops when the returned handle is dropped
    ///
    /// Events reach the handler one at a time, in emission order. Must be
    /// called from within a Tokio runtime.
    pub fn subscribe_handler(&self, subscription: EventSubscription) -> SubscriptionHandle {
        let id = subscription.id();
        let mut receiver = self.sender.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => subscription.deliver_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(subscription = %id, skipped, "event handler lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        SubscriptionHandle::new(id, task)
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    #[derive(Default)]
    struct RecordingHandler {
        notes: Mutex<Vec<String>>,
        gates: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl SessionEventHandler for RecordingHandler {
        async fn on_note(&self, note: Note) {
            self.notes.lock().push(note.text);
        }

        async fn on_confirm_gate_changed(&self, enabled: bool) {
            self.gates.lock().push(enabled);
        }
    }

    fn note_event(text: &str) -> SessionEvent {
        let mut log = crate::message::NoteLog::new();
        SessionEvent::NoteAppended {
            session_id: uuid::Uuid::new_v4(),
            note: log.append("A", text, crate::message::NoteOrigin::Local),
        }
    }

    fn gate_event(enabled: bool) -> SessionEvent {
        SessionEvent::ConfirmGateChanged {
            session_id: uuid::Uuid::new_v4(),
            enabled,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_priorities_and_filters() {
        let note = note_event("hi");
        let gate = gate_event(true);

        assert_eq!(note.priority(), EventPriority::Low);
        assert_eq!(gate.priority(), EventPriority::High);

        let high_only = EventFilter::min_priority(EventPriority::High);
        assert!(!note.passes_filter(&high_only));
        assert!(gate.passes_filter(&high_only));

        let notes_only = EventFilter::kinds([EventKind::NoteAppended]);
        assert!(note.passes_filter(&notes_only));
        assert!(!gate.passes_filter(&notes_only));
    }

    #[test]
    fn test_error_status_is_critical() {
        let event = SessionEvent::StatusChanged {
            previous: SessionStatus::Connecting,
            status: SessionStatus::Error("No token returned from backend".to_string()),
            room: Some("room1".to_string()),
        };
        assert_eq!(event.priority(), EventPriority::Critical);
        assert_eq!(event.session_id(), None);
    }

    #[tokio::test]
    async fn test_stream_sees_events_in_order() {
        let emitter = EventEmitter::new(16);
        let mut stream = emitter.subscribe();

        emitter.emit(note_event("one"));
        emitter.emit(note_event("two"));

        for expected in ["one", "two"] {
            match stream.next().await {
                Some(Ok(SessionEvent::NoteAppended { note, .. })) => assert_eq!(note.text, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_handler_receives_filtered_events() {
        let emitter = EventEmitter::new(16);
        let handler = Arc::new(RecordingHandler::default());
        let _handle = emitter.subscribe_handler(EventSubscription::new(
            handler.clone(),
            EventFilter::kinds([EventKind::NoteAppended]),
        ));

        emitter.emit(note_event("first"));
        emitter.emit(gate_event(true));
        emitter.emit(note_event("second"));
        settle().await;

        assert_eq!(*handler.notes.lock(), vec!["first", "second"]);
        assert!(handler.gates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_handle_unsubscribes() {
        let emitter = EventEmitter::new(16);
        let handler = Arc::new(RecordingHandler::default());
        let handle = emitter.subscribe_handler(EventSubscription::all_events(handler.clone()));
        assert!(handle.is_active());

        emitter.emit(gate_event(true));
        settle().await;
        drop(handle);
        settle().await;
        emitter.emit(gate_event(false));
        settle().await;

        assert_eq!(*handler.gates.lock(), vec![true]);
        assert_eq!(emitter.receiver_count(), 0);
    }
}

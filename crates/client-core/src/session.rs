//! Local view of one joined room
//!
//! A [`Session`] exists from a successful join until leave or disconnect. It
//! exclusively owns the participant roster, the note log and the standing
//! summary slot. All three live behind a single lock and every mutation runs to
//! completion under it, emitting its [`SessionEvent`] before the lock is
//! released; observers therefore see events in the same order the state
//! changed.
//!
//! Once [`close`](Session::close)d, a session refuses further mutations. Results
//! of backend calls that were in flight during teardown are checked against
//! [`is_closed`](Session::is_closed) and discarded.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::events::{EventEmitter, RosterChange, SessionEvent};
use crate::message::{Note, NoteLog, NoteOrigin};
use crate::participant::{Participant, ParticipantRegistry};

/// Unique identifier of one join of one room
pub type SessionId = uuid::Uuid;

/// Sender used for notes seeded from the backend's stored summary
pub const RECOVERED_SUMMARY_SENDER: &str = "system";

/// Controller-level connection status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// No session has been joined yet
    NotConnected,
    /// A join is in progress
    Connecting,
    /// Joined and connected
    Connected,
    /// The local user left
    Left,
    /// The last join attempt failed
    Error(String),
    /// The transport dropped the session
    Disconnected(String),
}

impl SessionStatus {
    /// Whether a session is active
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionStatus::Connected)
    }

    /// Whether this status reports a failure
    pub fn is_error(&self) -> bool {
        matches!(self, SessionStatus::Error(_) | SessionStatus::Disconnected(_))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::NotConnected => write!(f, "Not connected"),
            SessionStatus::Connecting => write!(f, "Connecting"),
            SessionStatus::Connected => write!(f, "Connected"),
            SessionStatus::Left => write!(f, "Left the room"),
            SessionStatus::Error(message) => write!(f, "Error: {}", message),
            SessionStatus::Disconnected(reason) => write!(f, "Disconnected: {}", reason),
        }
    }
}

/// How the standing summary reached this session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummarySource {
    /// A transfer initiated by this client
    Transfer,
    /// A context-summary note received over the transport
    Broadcast,
    /// Pulled from the backend on join
    Recovered,
}

/// The most recent context summary known to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingSummary {
    /// Summary text without the context-summary marker
    pub text: String,
    /// Logical author used when the summary is replayed
    pub author: String,
    /// Where the summary came from
    pub source: SummarySource,
    /// When this session adopted it
    pub updated_at: DateTime<Utc>,
}

impl StandingSummary {
    /// Create a summary stamped now
    pub fn new(text: impl Into<String>, author: impl Into<String>, source: SummarySource) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
            source,
            updated_at: Utc::now(),
        }
    }
}

/// Outcome of applying a roster event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterUpdate {
    /// Whether membership actually changed
    pub changed: bool,
    /// Whether the roster now has at least two members, one of them remote
    pub has_remote_party: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    registry: ParticipantRegistry,
    notes: NoteLog,
    standing_summary: Option<StandingSummary>,
    closed: bool,
}

/// Local session state for one joined room
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    room: String,
    local_identity: String,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    events: EventEmitter,
}

impl Session {
    /// Create a session with the local identity as its first member
    pub fn open(room: impl Into<String>, local_identity: impl Into<String>, events: EventEmitter) -> Self {
        let local_identity = local_identity.into();
        let mut state = SessionState::default();
        state.registry.add_self(local_identity.clone());

        let session = Self {
            id: uuid::Uuid::new_v4(),
            room: room.into(),
            local_identity,
            created_at: Utc::now(),
            state: RwLock::new(state),
            events,
        };
        session.events.emit(SessionEvent::RosterChanged {
            session_id: session.id,
            members: vec![session.local_identity.clone()],
            change: RosterChange::Reset,
        });
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Emitter this session publishes on
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Current member identities in join order
    pub fn members(&self) -> Vec<String> {
        self.state.read().registry.members()
    }

    /// Current member records in join order
    pub fn participants(&self) -> Vec<Participant> {
        self.state.read().registry.participants().to_vec()
    }

    /// Whether the roster has at least two members, one of them remote
    pub fn has_remote_party(&self) -> bool {
        self.state.read().registry.has_remote_party()
    }

    /// Snapshot of the note log
    pub fn notes(&self) -> Vec<Note> {
        self.state.read().notes.notes().to_vec()
    }

    pub fn note_count(&self) -> usize {
        self.state.read().notes.len()
    }

    /// Note log serialized as `sender: text` lines
    pub fn transcript(&self) -> String {
        self.state.read().notes.transcript()
    }

    pub fn standing_summary(&self) -> Option<StandingSummary> {
        self.state.read().standing_summary.clone()
    }

    /// Apply a transport join event
    pub fn on_remote_join(&self, identity: &str) -> RosterUpdate {
        let mut state = self.state.write();
        if state.closed {
            return RosterUpdate { changed: false, has_remote_party: false };
        }
        let changed = !state.registry.contains(identity);
        let has_remote_party = state.registry.on_remote_join(identity);
        if changed {
            self.events.emit(SessionEvent::RosterChanged {
                session_id: self.id,
                members: state.registry.members(),
                change: RosterChange::Joined(identity.to_string()),
            });
        } else {
            debug!(session_id = %self.id, identity, "duplicate join ignored");
        }
        RosterUpdate { changed, has_remote_party }
    }

    /// Apply a transport leave event
    pub fn on_remote_leave(&self, identity: &str) -> RosterUpdate {
        let mut state = self.state.write();
        if state.closed {
            return RosterUpdate { changed: false, has_remote_party: false };
        }
        let changed = state.registry.on_remote_leave(identity);
        if changed {
            self.events.emit(SessionEvent::RosterChanged {
                session_id: self.id,
                members: state.registry.members(),
                change: RosterChange::Left(identity.to_string()),
            });
        } else {
            debug!(session_id = %self.id, identity, "leave for unknown participant ignored");
        }
        RosterUpdate {
            changed,
            has_remote_party: state.registry.has_remote_party(),
        }
    }

    /// Append a note to the log
    pub fn append_note(&self, sender: &str, text: &str, origin: NoteOrigin) -> ClientResult<Note> {
        let mut state = self.state.write();
        if state.closed {
            return Err(ClientError::SessionEnded);
        }
        let note = state.notes.append(sender, text, origin);
        self.events.emit(SessionEvent::NoteAppended {
            session_id: self.id,
            note: note.clone(),
        });
        Ok(note)
    }

    /// Append a note received over the transport
    ///
    /// A context summary is a replay, and is dropped (returns `None`), when the
    /// log already holds the same summary text from the same author or from
    /// [`RECOVERED_SUMMARY_SENDER`]. The same text from a different author is a
    /// new handoff and is kept. A new context summary also becomes the standing
    /// summary, attributed to the note's sender.
    pub fn absorb_remote_note(&self, sender: &str, text: &str) -> Option<Note> {
        let mut state = self.state.write();
        if state.closed {
            return None;
        }

        let summary_body = text.strip_prefix(crate::message::CONTEXT_SUMMARY_PREFIX);
        if let Some(body) = summary_body {
            let replayed = state.notes.notes().iter().any(|n| {
                n.summary_body() == Some(body) && (n.sender == sender || n.sender == RECOVERED_SUMMARY_SENDER)
            });
            if replayed {
                debug!(session_id = %self.id, sender, "replayed summary already in log");
                return None;
            }
        }

        let note = state.notes.append(sender, text, NoteOrigin::Remote);
        self.events.emit(SessionEvent::NoteAppended {
            session_id: self.id,
            note: note.clone(),
        });

        if let Some(body) = summary_body {
            let summary = StandingSummary::new(body, sender, SummarySource::Broadcast);
            state.standing_summary = Some(summary.clone());
            self.events.emit(SessionEvent::StandingSummaryChanged {
                session_id: self.id,
                summary,
            });
        }
        Some(note)
    }

    /// Replace the standing summary
    pub fn set_standing_summary(&self, summary: StandingSummary) -> ClientResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(ClientError::SessionEnded);
        }
        state.standing_summary = Some(summary.clone());
        self.events.emit(SessionEvent::StandingSummaryChanged {
            session_id: self.id,
            summary,
        });
        Ok(())
    }

    /// Seed the standing summary from the backend if none exists yet
    ///
    /// Appends the summary as a context-summary note from
    /// [`RECOVERED_SUMMARY_SENDER`] and returns it. Returns `None` when a
    /// standing summary is already known, when the log already holds this
    /// summary, or when the session is closed.
    pub fn seed_standing_summary(&self, text: &str) -> Option<Note> {
        let mut state = self.state.write();
        if state.closed || state.standing_summary.is_some() || state.notes.contains_summary(text) {
            return None;
        }

        let note = state
            .notes
            .append(RECOVERED_SUMMARY_SENDER, Note::summary_text(text), NoteOrigin::Recovered);
        self.events.emit(SessionEvent::NoteAppended {
            session_id: self.id,
            note: note.clone(),
        });

        let summary = StandingSummary::new(text, RECOVERED_SUMMARY_SENDER, SummarySource::Recovered);
        state.standing_summary = Some(summary.clone());
        self.events.emit(SessionEvent::StandingSummaryChanged {
            session_id: self.id,
            summary,
        });
        Some(note)
    }

    /// Tear down local state
    ///
    /// Clears the roster, the note log and the standing summary. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.write();
        if state.closed {
            return;
        }
        state.closed = true;
        state.registry.clear();
        state.notes.clear();
        state.standing_summary = None;
        self.events.emit(SessionEvent::RosterChanged {
            session_id: self.id,
            members: Vec::new(),
            change: RosterChange::Reset,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::open("room1", "A", EventEmitter::new(64))
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SessionStatus::NotConnected.to_string(), "Not connected");
        assert_eq!(SessionStatus::Connected.to_string(), "Connected");
        assert_eq!(SessionStatus::Left.to_string(), "Left the room");
        assert_eq!(
            SessionStatus::Error("No token returned from backend".into()).to_string(),
            "Error: No token returned from backend"
        );
        assert!(SessionStatus::Disconnected("kicked".into()).is_error());
        assert!(!SessionStatus::Left.is_error());
    }

    #[test]
    fn test_open_registers_self() {
        let session = session();
        assert_eq!(session.members(), vec!["A"]);
        assert_eq!(session.room(), "room1");
        assert!(!session.has_remote_party());
    }

    #[test]
    fn test_roster_updates() {
        let session = session();
        let mut events = session.events().receiver();

        let update = session.on_remote_join("B");
        assert_eq!(update, RosterUpdate { changed: true, has_remote_party: true });
        let update = session.on_remote_join("B");
        assert_eq!(update, RosterUpdate { changed: false, has_remote_party: true });
        let update = session.on_remote_leave("B");
        assert_eq!(update, RosterUpdate { changed: true, has_remote_party: false });

        let mut changes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::RosterChanged { change, .. } = event {
                changes.push(change);
            }
        }
        assert_eq!(changes, vec![RosterChange::Joined("B".into()), RosterChange::Left("B".into())]);
    }

    #[test]
    fn test_remote_summary_becomes_standing_and_dedupes() {
        let session = session();
        let text = Note::summary_text("caller wants billing help");

        assert!(session.absorb_remote_note("B", &text).is_some());
        assert!(session.absorb_remote_note("B", &text).is_none());

        assert_eq!(session.note_count(), 1);
        let summary = session.standing_summary().unwrap();
        assert_eq!(summary.text, "caller wants billing help");
        assert_eq!(summary.author, "B");
        assert_eq!(summary.source, SummarySource::Broadcast);
    }

    #[test]
    fn test_same_summary_from_new_author_is_a_new_handoff() {
        let session = session();
        let text = Note::summary_text("caller wants billing help");

        assert!(session.absorb_remote_note("B", &text).is_some());
        let note = session.absorb_remote_note("C", &text).unwrap();
        assert_eq!(note.sender, "C");
        assert_eq!(session.note_count(), 2);
        assert_eq!(session.standing_summary().unwrap().author, "C");

        // Replays of either handoff are still dropped
        assert!(session.absorb_remote_note("B", &text).is_none());
        assert!(session.absorb_remote_note("C", &text).is_none());
        assert_eq!(session.note_count(), 2);
    }

    #[test]
    fn test_seed_only_when_no_standing_summary() {
        let session = session();
        let note = session.seed_standing_summary("stored summary").unwrap();
        assert_eq!(note.sender, RECOVERED_SUMMARY_SENDER);
        assert_eq!(note.origin, NoteOrigin::Recovered);
        assert!(session.seed_standing_summary("another").is_none());
        assert_eq!(session.standing_summary().unwrap().text, "stored summary");

        // A push replay of the same summary arriving later is not appended twice
        assert!(session.absorb_remote_note("B", &Note::summary_text("stored summary")).is_none());
        assert_eq!(session.note_count(), 1);
    }

    #[test]
    fn test_closed_session_rejects_mutation() {
        let session = session();
        session.append_note("A", "hello", NoteOrigin::Local).unwrap();
        session.on_remote_join("B");
        session.close();

        assert!(session.is_closed());
        assert!(session.members().is_empty());
        assert_eq!(session.note_count(), 0);
        assert_eq!(session.append_note("A", "late", NoteOrigin::Local), Err(ClientError::SessionEnded));
        assert!(!session.on_remote_join("C").changed);
        assert!(session.seed_standing_summary("late").is_none());
        assert!(session.standing_summary().is_none());
    }
}

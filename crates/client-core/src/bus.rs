//! Note fan-out over the room transport
//!
//! [`MessageBus`] moves notes between the local [`Session`] log and the room:
//!
//! - **Outbound**: [`publish`](MessageBus::publish) appends to the local log
//!   first (optimistic echo), then broadcasts reliably. Publishes are
//!   serialized, so one sender's notes reach the log and the wire in call
//!   order. Cross-sender order is whatever the transport delivers.
//! - **Inbound**: [`on_receive`](MessageBus::on_receive) decodes a payload and
//!   appends it. Undecodable payloads are logged and dropped; they never reach
//!   the caller.
//! - **Late joiners**: when someone joins and a standing summary exists, the bus
//!   re-broadcasts it under its original author (push). A client that has just
//!   joined also asks the backend for a stored summary (pull). Either path alone
//!   delivers the summary; receivers drop copies already in their log.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::BackendApi;
use crate::error::{ClientError, ClientResult};
use crate::events::SessionEvent;
use crate::message::{Note, NoteOrigin, NotePayload};
use crate::session::Session;
use crate::transport::{BroadcastOptions, RoomConnection};

/// Sender shown for inbound notes with neither a payload sender nor a transport origin
pub const UNKNOWN_SENDER: &str = "unknown";

/// Reliable note broadcast for one session
#[derive(Debug)]
pub struct MessageBus {
    session: Arc<Session>,
    connection: Arc<dyn RoomConnection>,
    outbound: Mutex<()>,
    replay_on_join: bool,
}

impl MessageBus {
    /// Bind a session to its room connection
    pub fn new(session: Arc<Session>, connection: Arc<dyn RoomConnection>, replay_on_join: bool) -> Self {
        Self {
            session,
            connection,
            outbound: Mutex::new(()),
            replay_on_join,
        }
    }

    /// Session whose log this bus feeds
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Publish a note from the local participant
    ///
    /// The note is in the local log when this returns, even if the broadcast
    /// failed; the error reports the delivery failure only.
    pub async fn publish(&self, text: &str) -> ClientResult<Note> {
        let sender = self.session.local_identity().to_string();
        self.send(&sender, text, true)
            .await?
            .ok_or_else(|| ClientError::invalid_state("published note was not echoed"))
    }

    /// Publish a context summary from the local participant
    pub async fn publish_summary(&self, summary: &str) -> ClientResult<Note> {
        self.publish(&Note::summary_text(summary)).await
    }

    /// Handle a payload received from the transport
    ///
    /// Returns the appended note, or `None` when the payload was malformed, was a
    /// replay of a summary already in the log, or arrived after teardown.
    pub fn on_receive(&self, raw: &[u8], origin: Option<&str>) -> Option<Note> {
        let payload = match NotePayload::decode(raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    session_id = %self.session.id(),
                    origin = origin.unwrap_or(UNKNOWN_SENDER),
                    bytes = raw.len(),
                    error = %e,
                    "dropping malformed payload"
                );
                return None;
            }
        };

        let sender = payload
            .sender
            .filter(|s| !s.is_empty())
            .or_else(|| origin.map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
        self.session.absorb_remote_note(&sender, &payload.text)
    }

    /// React to a participant joining
    ///
    /// Replays the standing summary if replay is enabled and one exists.
    pub async fn on_participant_joined(&self, identity: &str) {
        if !self.replay_on_join {
            return;
        }
        match self.replay_standing_summary().await {
            Ok(true) => debug!(session_id = %self.session.id(), joiner = identity, "standing summary replayed"),
            Ok(false) => {}
            Err(e) => {
                warn!(session_id = %self.session.id(), joiner = identity, error = %e, "standing summary replay failed");
                self.session.events().emit(SessionEvent::Warning {
                    session_id: Some(self.session.id()),
                    error: e,
                });
            }
        }
    }

    /// Re-broadcast the standing summary to the room
    ///
    /// Sent under the summary's original author and not echoed locally: the
    /// local log already holds it. Returns whether anything was sent.
    pub async fn replay_standing_summary(&self) -> ClientResult<bool> {
        let Some(summary) = self.session.standing_summary() else {
            return Ok(false);
        };
        self.send(&summary.author, &Note::summary_text(&summary.text), false).await?;
        Ok(true)
    }

    /// Seed the standing summary from the backend after joining
    ///
    /// Does nothing when a standing summary already exists. Lookup failures are
    /// downgraded to a warning event.
    pub async fn recover_standing_summary(&self, backend: &dyn BackendApi) -> Option<Note> {
        let room = self.session.room().to_string();
        match backend.fetch_summary(&room).await {
            Ok(Some(text)) => {
                let note = self.session.seed_standing_summary(&text);
                if note.is_some() {
                    info!(session_id = %self.session.id(), room = %room, "standing summary recovered from backend");
                }
                note
            }
            Ok(None) => {
                debug!(session_id = %self.session.id(), room = %room, "no stored summary");
                None
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), room = %room, error = %e, "summary recovery failed");
                self.session.events().emit(SessionEvent::Warning {
                    session_id: Some(self.session.id()),
                    error: e,
                });
                None
            }
        }
    }

    async fn send(&self, sender: &str, text: &str, local_echo: bool) -> ClientResult<Option<Note>> {
        let payload: Bytes = NotePayload::new(sender, text).encode()?;

        let _outbound = self.outbound.lock().await;
        if self.session.is_closed() {
            return Err(ClientError::SessionEnded);
        }
        let note = if local_echo {
            Some(self.session.append_note(sender, text, NoteOrigin::Local)?)
        } else {
            None
        };
        self.connection.broadcast(payload, BroadcastOptions::reliable()).await?;
        Ok(note)
    }
}

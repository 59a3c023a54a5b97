//! Warm transfer protocol
//!
//! [`TransferCoordinator`] drives one session's handoff:
//!
//! ```text
//! Idle -> Requesting -> Broadcasting -> Completed <-> AwaitingConfirmation
//!              |
//!              +-> Failed (retry re-enters Requesting)
//! ```
//!
//! `Requesting` asks the backend for a credential for the target agent,
//! sending the current transcript and an optional summary hint. `Broadcasting`
//! publishes the returned summary as a context-summary note and adopts it as
//! the session's standing summary. A publish failure there is reported as a
//! warning; the credential stays valid.
//!
//! The "confirm transfer & leave" gate is derived, not stored: it is open when
//! a transfer has completed at least once in this session *and* the roster has
//! a second, non-local member. `Completed` and `AwaitingConfirmation` track the
//! roster half of that condition. The coordinator never disconnects on its own.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::BackendApi;
use crate::bus::MessageBus;
use crate::error::{ClientError, ClientResult};
use crate::events::{EventEmitter, SessionEvent};
use crate::session::{SessionId, StandingSummary, SummarySource};

/// Message returned when a transfer is missing one of its required inputs
pub const MISSING_TRANSFER_INPUT: &str = "Missing room, your identity, or target identity.";

/// Message returned for a transfer requested while another is in flight
pub const TRANSFER_IN_PROGRESS: &str = "transfer already in progress";

/// Message used when the backend answers without a credential
pub const NO_TOKEN_RETURNED: &str = "No token returned from backend";

/// Transfer state machine states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    /// No transfer in flight
    Idle,
    /// Waiting for the backend to issue a credential
    Requesting,
    /// Publishing the returned summary
    Broadcasting,
    /// A transfer completed; no second party is present
    Completed,
    /// A transfer completed and a second party is present
    AwaitingConfirmation,
    /// The last attempt failed
    Failed {
        /// Error message, verbatim from the backend when it sent one
        reason: String,
    },
}

impl TransferState {
    /// Whether an attempt is currently running
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TransferState::Requesting | TransferState::Broadcasting)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Idle => write!(f, "idle"),
            TransferState::Requesting => write!(f, "requesting"),
            TransferState::Broadcasting => write!(f, "broadcasting"),
            TransferState::Completed => write!(f, "completed"),
            TransferState::AwaitingConfirmation => write!(f, "awaiting confirmation"),
            TransferState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// How the user asked for the summary to be produced
///
/// Blank input and the literal `auto` (any case) both ask the backend to
/// synthesize the summary. The text is still forwarded exactly as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryHint {
    /// Let the backend summarize the transcript
    Auto,
    /// Use the user's own summary
    Provided(String),
}

impl SummaryHint {
    /// Classify raw user input
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            SummaryHint::Auto
        } else {
            SummaryHint::Provided(raw.to_string())
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, SummaryHint::Auto)
    }
}

/// Body of `POST /transfer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub room: String,
    pub from_identity: String,
    pub to_identity: String,
    /// Summary hint as typed; empty or `auto` requests a synthesized summary
    pub summary: String,
    /// Note log as `sender: text` lines
    pub transcript: String,
}

/// What the backend returned for a successful transfer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Access credential for the target agent
    pub token: String,
    /// Context summary to hand over
    #[serde(default)]
    pub summary: Option<String>,
    /// Reference to synthesized audio of the summary
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// Transfer result surfaced to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Agent the credential was issued for
    pub to_identity: String,
    /// Credential admitting the target agent
    pub token: String,
    /// Context summary, if the backend produced one
    pub summary: Option<String>,
    /// Audio reference, if the backend produced one
    pub audio_url: Option<String>,
    /// Whether the summary broadcast reached the transport
    pub summary_delivered: bool,
}

#[derive(Debug)]
struct CoordinatorState {
    state: TransferState,
    completed_once: bool,
    remote_party: bool,
    gate: bool,
    last_result: Option<TransferResult>,
    last_error: Option<String>,
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self {
            state: TransferState::Idle,
            completed_once: false,
            remote_party: false,
            gate: false,
            last_result: None,
            last_error: None,
        }
    }
}

/// Per-session warm transfer state machine
#[derive(Debug)]
pub struct TransferCoordinator {
    session_id: SessionId,
    events: EventEmitter,
    inner: Mutex<CoordinatorState>,
}

impl TransferCoordinator {
    /// Create an idle coordinator for a session
    pub fn new(session_id: SessionId, events: EventEmitter) -> Self {
        Self {
            session_id,
            events,
            inner: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn state(&self) -> TransferState {
        self.inner.lock().state.clone()
    }

    /// Whether "confirm transfer & leave" is available
    pub fn confirm_enabled(&self) -> bool {
        self.inner.lock().gate
    }

    /// Whether a transfer has completed in this session
    pub fn has_completed(&self) -> bool {
        self.inner.lock().completed_once
    }

    /// Result of the last successful attempt
    pub fn last_result(&self) -> Option<TransferResult> {
        self.inner.lock().last_result.clone()
    }

    /// Error message of the last failed attempt
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Run one transfer attempt
    ///
    /// Fails with [`ClientError::Validation`] when room, local identity or
    /// target is blank, with [`ClientError::Transfer`] while another attempt is
    /// in flight, and with the backend's error (verbatim) when the backend
    /// refuses. A session torn down while the backend call was pending yields
    /// [`ClientError::SessionEnded`] and the outcome is discarded.
    pub async fn request_transfer(
        &self,
        bus: &MessageBus,
        backend: &dyn BackendApi,
        target: &str,
        summary_hint: &str,
    ) -> ClientResult<TransferResult> {
        let session = bus.session();
        let target = target.trim();

        {
            let mut inner = self.inner.lock();
            if inner.state.is_in_flight() {
                return Err(ClientError::transfer(TRANSFER_IN_PROGRESS));
            }
            inner.last_result = None;
            inner.last_error = None;

            if session.room().trim().is_empty() || session.local_identity().trim().is_empty() || target.is_empty() {
                inner.last_error = Some(MISSING_TRANSFER_INPUT.to_string());
                return Err(ClientError::validation(MISSING_TRANSFER_INPUT));
            }
            if session.is_closed() {
                return Err(ClientError::SessionEnded);
            }
            self.transition(&mut inner, TransferState::Requesting);
        }

        let hint = SummaryHint::parse(summary_hint);
        let request = TransferRequest {
            room: session.room().to_string(),
            from_identity: session.local_identity().to_string(),
            to_identity: target.to_string(),
            summary: summary_hint.to_string(),
            transcript: session.transcript(),
        };
        info!(
            session_id = %self.session_id,
            room = %request.room,
            from = %request.from_identity,
            target = %request.to_identity,
            auto_summary = hint.is_auto(),
            "requesting warm transfer"
        );

        let outcome = backend.request_transfer(&request).await.and_then(|outcome| {
            if outcome.token.is_empty() {
                Err(ClientError::backend(None, NO_TOKEN_RETURNED))
            } else {
                Ok(outcome)
            }
        });

        if session.is_closed() {
            debug!(session_id = %self.session_id, "transfer result arrived after teardown, discarded");
            return Err(ClientError::SessionEnded);
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session_id = %self.session_id, target, error = %e, "transfer request failed");
                let mut inner = self.inner.lock();
                inner.last_error = Some(e.to_string());
                self.transition(&mut inner, TransferState::Failed { reason: e.to_string() });
                return Err(e);
            }
        };

        self.transition(&mut self.inner.lock(), TransferState::Broadcasting);

        let summary = outcome.summary.filter(|s| !s.is_empty());
        let audio_url = outcome.audio_url.filter(|s| !s.is_empty());
        let mut summary_delivered = false;

        if let Some(text) = &summary {
            let standing = StandingSummary::new(text.clone(), session.local_identity(), SummarySource::Transfer);
            match bus.publish_summary(text).await {
                Ok(_) => summary_delivered = true,
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "summary broadcast failed, transfer still valid");
                    self.events.emit(SessionEvent::Warning {
                        session_id: Some(self.session_id),
                        error: e,
                    });
                }
            }
            if let Err(e) = session.set_standing_summary(standing) {
                debug!(session_id = %self.session_id, error = %e, "standing summary not updated");
            }
        }

        let result = TransferResult {
            to_identity: target.to_string(),
            token: outcome.token,
            summary,
            audio_url,
            summary_delivered,
        };

        {
            let mut inner = self.inner.lock();
            if session.is_closed() {
                return Err(ClientError::SessionEnded);
            }
            inner.completed_once = true;
            inner.remote_party = session.has_remote_party();
            inner.last_result = Some(result.clone());
            self.transition(&mut inner, TransferState::Completed);
            if inner.remote_party {
                self.transition(&mut inner, TransferState::AwaitingConfirmation);
            }
            self.events.emit(SessionEvent::TransferCompleted {
                session_id: self.session_id,
                result: result.clone(),
            });
            self.refresh_gate(&mut inner);
        }

        info!(
            session_id = %self.session_id,
            target = %result.to_identity,
            has_summary = result.summary.is_some(),
            "warm transfer completed"
        );
        Ok(result)
    }

    /// Apply the roster's remote-party condition after a join or leave
    pub fn on_roster_changed(&self, has_remote_party: bool) {
        let mut inner = self.inner.lock();
        inner.remote_party = has_remote_party;
        let next = match (&inner.state, has_remote_party) {
            (TransferState::Completed, true) => Some(TransferState::AwaitingConfirmation),
            (TransferState::AwaitingConfirmation, false) => Some(TransferState::Completed),
            _ => None,
        };
        if let Some(state) = next {
            self.transition(&mut inner, state);
        }
        self.refresh_gate(&mut inner);
    }

    /// Back to `Idle` with no completed transfer
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.completed_once = false;
        inner.remote_party = false;
        inner.last_result = None;
        inner.last_error = None;
        if inner.state != TransferState::Idle {
            self.transition(&mut inner, TransferState::Idle);
        }
        self.refresh_gate(&mut inner);
    }

    fn transition(&self, inner: &mut CoordinatorState, state: TransferState) {
        let previous = std::mem::replace(&mut inner.state, state.clone());
        debug!(session_id = %self.session_id, from = %previous, to = %state, "transfer state");
        self.events.emit(SessionEvent::TransferStateChanged {
            session_id: self.session_id,
            previous,
            state,
        });
    }

    fn refresh_gate(&self, inner: &mut CoordinatorState) {
        let gate = inner.completed_once && inner.remote_party;
        if gate != inner.gate {
            inner.gate = gate;
            self.events.emit(SessionEvent::ConfirmGateChanged {
                session_id: self.session_id,
                enabled: gate,
            });
        }
    }
}

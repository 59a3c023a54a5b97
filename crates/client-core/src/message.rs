//! Notes, the note log, and the broadcast payload codec
//!
//! A [`Note`] is a chat or context message. The session keeps them in an
//! append-only [`NoteLog`]; insertion order is the logical order used for
//! transcript reconstruction and for finding the latest context summary.
//!
//! A note whose text starts with [`CONTEXT_SUMMARY_PREFIX`] is a context
//! summary produced by a warm transfer. Those are what late joiners must see.
//!
//! On the wire a note travels as UTF-8 JSON `{"sender": .., "text": ..}`.
//!
//! ```rust
//! use warmline_client_core::message::{Note, NoteLog, NoteOrigin, CONTEXT_SUMMARY_PREFIX};
//!
//! let mut log = NoteLog::new();
//! log.append("caller", "I need help with billing", NoteOrigin::Remote);
//! log.append("A", Note::summary_text("caller wants billing help"), NoteOrigin::Local);
//!
//! assert_eq!(
//!     log.transcript(),
//!     format!("caller: I need help with billing\nA: {}caller wants billing help", CONTEXT_SUMMARY_PREFIX)
//! );
//! assert_eq!(log.latest_summary().and_then(|n| n.summary_body()), Some("caller wants billing help"));
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Marker prefix that tags a note as a context summary for the next agent
pub const CONTEXT_SUMMARY_PREFIX: &str = "[Call Summary for next agent]: ";

/// Where a note entered the local log from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteOrigin {
    /// Published by this client (optimistic local echo)
    Local,
    /// Received over the transport
    Remote,
    /// Seeded from the backend's stored summary
    Recovered,
}

/// A chat or context message in the session log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Logical author of the note
    pub sender: String,
    /// Note text as published
    pub text: String,
    /// Position in the session's note log
    pub sequence: u64,
    /// Local wall-clock time the note entered the log
    pub received_at: DateTime<Utc>,
    /// How the note reached the log
    pub origin: NoteOrigin,
}

impl Note {
    /// Build the tagged text for a context summary
    pub fn summary_text(summary: &str) -> String {
        format!("{}{}", CONTEXT_SUMMARY_PREFIX, summary)
    }

    /// Whether this note carries a context summary
    pub fn is_context_summary(&self) -> bool {
        self.text.starts_with(CONTEXT_SUMMARY_PREFIX)
    }

    /// The summary text without its marker, for context-summary notes
    pub fn summary_body(&self) -> Option<&str> {
        self.text.strip_prefix(CONTEXT_SUMMARY_PREFIX)
    }

    /// `sender: text`, as used in transcripts
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.sender, self.text)
    }
}

/// Append-only, ordered log of notes
#[derive(Debug, Default)]
pub struct NoteLog {
    notes: Vec<Note>,
    next_sequence: u64,
}

impl NoteLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a note and return the stored copy
    pub fn append(&mut self, sender: impl Into<String>, text: impl Into<String>, origin: NoteOrigin) -> Note {
        let note = Note {
            sender: sender.into(),
            text: text.into(),
            sequence: self.next_sequence,
            received_at: Utc::now(),
            origin,
        };
        self.next_sequence += 1;
        self.notes.push(note.clone());
        note
    }

    /// All notes in log order
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// The most recently appended context summary
    pub fn latest_summary(&self) -> Option<&Note> {
        self.notes.iter().rev().find(|n| n.is_context_summary())
    }

    /// Whether a context summary with this body is already in the log
    pub fn contains_summary(&self, summary: &str) -> bool {
        self.notes.iter().any(|n| n.summary_body() == Some(summary))
    }

    /// Serialize the log as `sender: text` lines joined by newlines
    pub fn transcript(&self) -> String {
        self.notes
            .iter()
            .map(Note::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of notes
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Drop every note
    pub fn clear(&mut self) {
        self.notes.clear();
        self.next_sequence = 0;
    }
}

/// Broadcast payload for a note
///
/// `sender` is optional on decode: foreign clients may omit it, in which case
/// the receiver falls back to the transport-reported origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub text: String,
}

impl NotePayload {
    /// Payload attributed to `sender`
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            text: text.into(),
        }
    }

    /// Encode as UTF-8 JSON
    pub fn encode(&self) -> ClientResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode from UTF-8 JSON
    pub fn decode(raw: &[u8]) -> ClientResult<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ClientError::decode(format!("payload is not UTF-8: {}", e)))?;
        Ok(serde_json::from_str(text)?)
    }
}

//! Participant roster for a single session
//!
//! [`ParticipantRegistry`] is the canonical view of who is in the room. It is
//! fed by transport join/leave events, which may be redelivered or arrive for
//! identities the registry never saw; both cases are no-ops rather than errors.
//!
//! Insertion order is preserved and exposed through [`ParticipantRegistry::members`],
//! which is what transcript attribution and presentation layers read.
//!
//! ```rust
//! use warmline_client_core::participant::ParticipantRegistry;
//!
//! let mut registry = ParticipantRegistry::new();
//! registry.add_self("agent-a");
//! assert!(!registry.has_remote_party());
//!
//! // Redelivered join events do not duplicate the member
//! assert!(registry.on_remote_join("agent-b"));
//! assert!(registry.on_remote_join("agent-b"));
//! assert_eq!(registry.members(), vec!["agent-a", "agent-b"]);
//!
//! // Leaving an unknown identity is a no-op
//! assert!(!registry.on_remote_leave("nobody"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A member of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Identity string, unique within the session
    pub identity: String,
    /// Logical join order within this session (0 is the first member)
    pub join_order: u64,
    /// Wall-clock time the join was observed locally
    pub joined_at: DateTime<Utc>,
    /// Whether this is the local participant
    pub is_local: bool,
}

/// Ordered, duplicate-free set of session members
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    local_identity: Option<String>,
    members: Vec<Participant>,
    next_order: u64,
}

impl ParticipantRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish the local identity as the first member
    ///
    /// Called once at join time. Calling it again starts a fresh roster with the
    /// new identity, since a registry only ever describes one local participant.
    pub fn add_self(&mut self, identity: impl Into<String>) {
        let identity = identity.into();
        self.members.clear();
        self.next_order = 0;
        self.local_identity = Some(identity.clone());
        self.push(identity, true);
    }

    /// Record a remote join, ignoring duplicates
    ///
    /// Returns whether the roster now satisfies the transfer-confirmation
    /// condition: at least two members with at least one of them not local.
    pub fn on_remote_join(&mut self, identity: &str) -> bool {
        if !self.contains(identity) {
            self.push(identity.to_string(), false);
        }
        self.has_remote_party()
    }

    /// Remove a member if present
    ///
    /// Returns whether anything was removed.
    pub fn on_remote_leave(&mut self, identity: &str) -> bool {
        match self.members.iter().position(|p| p.identity == identity) {
            Some(pos) => {
                self.members.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Current identities in insertion order
    pub fn members(&self) -> Vec<String> {
        self.members.iter().map(|p| p.identity.clone()).collect()
    }

    /// Full participant records in insertion order
    pub fn participants(&self) -> &[Participant] {
        &self.members
    }

    /// Whether `identity` is currently a member
    pub fn contains(&self, identity: &str) -> bool {
        self.members.iter().any(|p| p.identity == identity)
    }

    /// The local identity, if `add_self` has been called
    pub fn local_identity(&self) -> Option<&str> {
        self.local_identity.as_deref()
    }

    /// Whether at least two members are present and one of them is not local
    pub fn has_remote_party(&self) -> bool {
        let local = self.local_identity.as_deref();
        self.members.len() >= 2 && self.members.iter().any(|p| Some(p.identity.as_str()) != local)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the registry has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Drop every member, including the local one
    pub fn clear(&mut self) {
        self.members.clear();
        self.local_identity = None;
        self.next_order = 0;
    }

    fn push(&mut self, identity: String, is_local: bool) {
        self.members.push(Participant {
            identity,
            join_order: self.next_order,
            joined_at: Utc::now(),
            is_local,
        });
        self.next_order += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_is_first_member() {
        let mut registry = ParticipantRegistry::new();
        registry.add_self("A");

        assert_eq!(registry.members(), vec!["A"]);
        assert_eq!(registry.local_identity(), Some("A"));
        assert!(registry.participants()[0].is_local);
        assert!(!registry.has_remote_party());
    }

    #[test]
    fn test_join_reports_confirmation_condition() {
        let mut registry = ParticipantRegistry::new();
        registry.add_self("A");

        assert!(registry.on_remote_join("B"));
        assert_eq!(registry.members(), vec!["A", "B"]);
    }

    #[test]
    fn test_self_echo_does_not_satisfy_condition() {
        let mut registry = ParticipantRegistry::new();
        registry.add_self("A");

        // Transport echoing our own join must not look like a second party
        assert!(!registry.on_remote_join("A"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_and_out_of_order_delivery() {
        let mut registry = ParticipantRegistry::new();
        registry.add_self("A");

        // Leave for an identity we never saw
        assert!(!registry.on_remote_leave("C"));
        registry.on_remote_join("B");
        registry.on_remote_join("C");
        registry.on_remote_join("B");
        assert!(registry.on_remote_leave("B"));
        assert!(!registry.on_remote_leave("B"));

        assert_eq!(registry.members(), vec!["A", "C"]);
        assert!(!registry.contains("B"));
    }

    #[test]
    fn test_roster_never_holds_duplicates() {
        let mut registry = ParticipantRegistry::new();
        registry.add_self("A");

        let script = [
            ("join", "B"), ("join", "C"), ("leave", "D"), ("join", "B"),
            ("leave", "C"), ("join", "C"), ("join", "C"), ("leave", "B"),
            ("leave", "B"), ("join", "D"),
        ];
        for (op, identity) in script {
            match op {
                "join" => {
                    registry.on_remote_join(identity);
                }
                _ => {
                    registry.on_remote_leave(identity);
                    assert!(!registry.contains(identity));
                }
            }
            let members = registry.members();
            let mut deduped = members.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(members.len(), deduped.len(), "duplicate in {:?}", members);
        }

        assert_eq!(registry.members(), vec!["A", "C", "D"]);
    }

    #[test]
    fn test_join_order_is_monotonic() {
        let mut registry = ParticipantRegistry::new();
        registry.add_self("A");
        registry.on_remote_join("B");
        registry.on_remote_leave("B");
        registry.on_remote_join("B");

        let orders: Vec<u64> = registry.participants().iter().map(|p| p.join_order).collect();
        assert_eq!(orders, vec![0, 2]);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut registry = ParticipantRegistry::new();
        registry.add_self("A");
        registry.on_remote_join("B");
        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(registry.local_identity(), None);
    }
}

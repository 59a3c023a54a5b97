//! In-process room transport
//!
//! [`LoopbackHub`] behaves like a tiny room service living inside the process:
//! clients connect with an [`AccessGrant`] credential, existing members are
//! told about joins and leaves, and broadcasts reach every member except the
//! sender. Connecting twice with the same identity replaces the older
//! connection, which receives a `Disconnected` event, as a real room service
//! does.
//!
//! The hub also exposes a few controls for exercising failure paths: refusing
//! connections, failing broadcasts, injecting raw payloads and kicking
//! participants.
//!
//! ```rust
//! use warmline_client_core::transport::{AccessGrant, LoopbackHub, TransportConnector, TransportEvent};
//!
//! # async fn example() -> warmline_client_core::ClientResult<()> {
//! let hub = LoopbackHub::new();
//! let token_a = AccessGrant::new("A", "room1").encode_unsigned()?;
//! let token_b = AccessGrant::new("B", "room1").encode_unsigned()?;
//!
//! let mut a = hub.connect("loopback://", &token_a).await?;
//! let b = hub.connect("loopback://", &token_b).await?;
//! assert_eq!(b.remote_participants, vec!["A"]);
//!
//! let event = a.events.recv().await;
//! assert_eq!(event, Some(TransportEvent::ParticipantJoined { identity: "B".into() }));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use super::{AccessGrant, BroadcastOptions, RoomConnection, TransportConnector, TransportEvent, TransportSession};
use crate::error::{ClientError, ClientResult};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
struct Member {
    identity: String,
    connection_id: uuid::Uuid,
    events_tx: mpsc::Sender<TransportEvent>,
}

struct HubInner {
    rooms: DashMap<String, Vec<Member>>,
    accepting: AtomicBool,
    broadcasting: AtomicBool,
    channel_capacity: usize,
}

/// In-process room service
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a hub whose per-connection event channels hold `capacity` events
    ///
    /// The hub never waits on a member. An event for a member whose channel is
    /// full is dropped, and a reliable broadcast that could not reach every
    /// member fails with a transport error.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: DashMap::new(),
                accepting: AtomicBool::new(true),
                broadcasting: AtomicBool::new(true),
                channel_capacity: capacity.max(1),
            }),
        }
    }

    /// Identities currently connected to `room`, in join order
    pub fn members(&self, room: &str) -> Vec<String> {
        self.inner
            .rooms
            .get(room)
            .map(|members| members.iter().map(|m| m.identity.clone()).collect())
            .unwrap_or_default()
    }

    /// Accept or refuse new connections
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Let broadcasts through or fail them with a transport error
    pub fn set_broadcasting(&self, enabled: bool) {
        self.inner.broadcasting.store(enabled, Ordering::SeqCst);
    }

    /// Deliver raw bytes to every member of `room`
    pub fn inject(&self, room: &str, payload: Bytes, origin: Option<&str>) {
        let event = TransportEvent::MessageReceived {
            payload,
            origin: origin.map(str::to_string),
        };
        self.notify(room, |_| true, event);
    }

    /// Drop `identity` from `room` as the room service would
    ///
    /// The kicked connection gets `Disconnected { reason }`; everyone else gets
    /// `ParticipantLeft`.
    pub fn kick(&self, room: &str, identity: &str, reason: &str) -> bool {
        let removed = self.remove_where(room, |m| m.identity == identity);
        if removed.is_empty() {
            return false;
        }
        info!(room, identity, reason, "participant removed by room service");
        for member in removed {
            deliver(room, &member.events_tx, TransportEvent::Disconnected { reason: reason.to_string() });
        }
        self.notify(room, |_| true, TransportEvent::ParticipantLeft { identity: identity.to_string() });
        true
    }

    fn senders(&self, room: &str, filter: impl Fn(&Member) -> bool) -> Vec<mpsc::Sender<TransportEvent>> {
        self.inner
            .rooms
            .get(room)
            .map(|members| members.iter().filter(|&m| filter(m)).map(|m| m.events_tx.clone()).collect())
            .unwrap_or_default()
    }

    /// Queue `event` for every matching member without waiting
    ///
    /// Returns how many members had a full channel and missed the event.
    fn notify(&self, room: &str, filter: impl Fn(&Member) -> bool, event: TransportEvent) -> usize {
        self.senders(room, filter)
            .iter()
            .filter(|tx| !deliver(room, tx, event.clone()))
            .count()
    }

    fn remove_where(&self, room: &str, predicate: impl Fn(&Member) -> bool) -> Vec<Member> {
        let mut removed = Vec::new();
        if let Some(mut members) = self.inner.rooms.get_mut(room) {
            let mut kept = Vec::with_capacity(members.len());
            for member in members.drain(..) {
                if predicate(&member) {
                    removed.push(member);
                } else {
                    kept.push(member);
                }
            }
            *members = kept;
        }
        self.inner.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopbackHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackHub")
            .field("rooms", &self.inner.rooms.len())
            .finish()
    }
}

/// Non-blocking send; `false` when the member's channel is full
///
/// Closed channels count as delivered: the member is already gone.
fn deliver(room: &str, tx: &mpsc::Sender<TransportEvent>, event: TransportEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            warn!(room, %event, "member event channel full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => {
            trace!(room, "member channel closed");
            true
        }
    }
}

#[async_trait]
impl TransportConnector for LoopbackHub {
    async fn connect(&self, url: &str, credential: &str) -> ClientResult<TransportSession> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(ClientError::transport(format!("room service at {} is not accepting connections", url)));
        }
        let grant = AccessGrant::decode(credential)?;
        if !grant.video.room_join {
            return Err(ClientError::transport("access token does not allow joining"));
        }

        let room = grant.room().to_string();
        let identity = grant.identity().to_string();
        let connection_id = uuid::Uuid::new_v4();
        let (events_tx, events) = mpsc::channel(self.inner.channel_capacity);

        let (remote_participants, replaced) = {
            let mut members = self.inner.rooms.entry(room.clone()).or_default();
            let replaced: Vec<Member> = members.iter().filter(|m| m.identity == identity).cloned().collect();
            members.retain(|m| m.identity != identity);
            let remote: Vec<String> = members.iter().map(|m| m.identity.clone()).collect();
            members.push(Member {
                identity: identity.clone(),
                connection_id,
                events_tx,
            });
            (remote, replaced)
        };

        info!(room = %room, identity = %identity, url, "loopback connection established");

        if replaced.is_empty() {
            self.notify(
                &room,
                |m| m.connection_id != connection_id,
                TransportEvent::ParticipantJoined { identity: identity.clone() },
            );
        } else {
            for old in replaced {
                warn!(room = %room, identity = %identity, "identity reconnected, replacing older connection");
                deliver(
                    &room,
                    &old.events_tx,
                    TransportEvent::Disconnected {
                        reason: "duplicate identity".to_string(),
                    },
                );
            }
        }

        let connection = LoopbackConnection {
            inner: Arc::new(ConnectionInner {
                hub: self.clone(),
                room,
                identity,
                connection_id,
                closed: AtomicBool::new(false),
            }),
        };

        Ok(TransportSession {
            connection: Arc::new(connection),
            events,
            remote_participants,
        })
    }
}

struct ConnectionInner {
    hub: LoopbackHub,
    room: String,
    identity: String,
    connection_id: uuid::Uuid,
    closed: AtomicBool,
}

/// Connection handed out by [`LoopbackHub`]
#[derive(Clone)]
pub struct LoopbackConnection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for LoopbackConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackConnection")
            .field("room", &self.inner.room)
            .field("identity", &self.inner.identity)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl LoopbackConnection {
    fn is_member(&self) -> bool {
        let inner = &self.inner;
        inner
            .hub
            .inner
            .rooms
            .get(&inner.room)
            .map(|members| members.iter().any(|m| m.connection_id == inner.connection_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl RoomConnection for LoopbackConnection {
    fn local_identity(&self) -> &str {
        &self.inner.identity
    }

    fn room(&self) -> &str {
        &self.inner.room
    }

    async fn broadcast(&self, payload: Bytes, options: BroadcastOptions) -> ClientResult<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) || !self.is_member() {
            return Err(ClientError::transport("connection is closed"));
        }
        if !inner.hub.inner.broadcasting.load(Ordering::SeqCst) {
            return Err(ClientError::transport("data channel unavailable"));
        }

        trace!(room = %inner.room, identity = %inner.identity, bytes = payload.len(), reliable = options.reliable, "broadcast");
        let missed = inner.hub.notify(
            &inner.room,
            |m| m.connection_id != inner.connection_id,
            TransportEvent::MessageReceived {
                payload,
                origin: Some(inner.identity.clone()),
            },
        );
        if missed > 0 && options.reliable {
            return Err(ClientError::transport(format!(
                "{} member(s) of {} are not keeping up, message not delivered to them",
                missed, inner.room
            )));
        }
        Ok(())
    }

    async fn disconnect(&self) -> ClientResult<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let removed = inner.hub.remove_where(&inner.room, |m| m.connection_id == inner.connection_id);
        if !removed.is_empty() {
            debug!(room = %inner.room, identity = %inner.identity, "loopback connection closed");
            inner.hub.notify(&inner.room, |_| true, TransportEvent::ParticipantLeft {
                identity: inner.identity.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(identity: &str, room: &str) -> String {
        AccessGrant::new(identity, room).encode_unsigned().unwrap()
    }

    #[tokio::test]
    async fn test_join_and_leave_notifications() {
        let hub = LoopbackHub::new();
        let mut a = hub.connect("loopback://", &token("A", "room1")).await.unwrap();
        let b = hub.connect("loopback://", &token("B", "room1")).await.unwrap();

        assert!(a.remote_participants.is_empty());
        assert_eq!(b.remote_participants, vec!["A"]);
        assert_eq!(hub.members("room1"), vec!["A", "B"]);

        b.connection.disconnect().await.unwrap();
        b.connection.disconnect().await.unwrap();

        assert_eq!(a.events.recv().await, Some(TransportEvent::ParticipantJoined { identity: "B".into() }));
        assert_eq!(a.events.recv().await, Some(TransportEvent::ParticipantLeft { identity: "B".into() }));
        assert_eq!(hub.members("room1"), vec!["A"]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender_and_other_rooms() {
        let hub = LoopbackHub::new();
        let mut a = hub.connect("loopback://", &token("A", "room1")).await.unwrap();
        let mut b = hub.connect("loopback://", &token("B", "room1")).await.unwrap();
        let mut c = hub.connect("loopback://", &token("C", "room2")).await.unwrap();
        // Drain A's join notification for B
        a.events.recv().await;

        b.connection
            .broadcast(Bytes::from_static(b"hello"), BroadcastOptions::reliable())
            .await
            .unwrap();

        assert_eq!(
            a.events.recv().await,
            Some(TransportEvent::MessageReceived {
                payload: Bytes::from_static(b"hello"),
                origin: Some("B".into()),
            })
        );
        assert!(b.events.try_recv().is_err());
        assert!(c.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_identity_replaces_connection() {
        let hub = LoopbackHub::new();
        let mut first = hub.connect("loopback://", &token("A", "room1")).await.unwrap();
        let _second = hub.connect("loopback://", &token("A", "room1")).await.unwrap();

        assert_eq!(
            first.events.recv().await,
            Some(TransportEvent::Disconnected { reason: "duplicate identity".into() })
        );
        assert_eq!(hub.members("room1"), vec!["A"]);
        assert!(first
            .connection
            .broadcast(Bytes::from_static(b"x"), BroadcastOptions::reliable())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let hub = LoopbackHub::new();
        hub.set_accepting(false);
        let err = hub.connect("loopback://", &token("A", "room1")).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));

        hub.set_accepting(true);
        let err = hub.connect("loopback://", "not-a-token").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_kick_notifies_both_sides() {
        let hub = LoopbackHub::new();
        let mut a = hub.connect("loopback://", &token("A", "room1")).await.unwrap();
        let mut b = hub.connect("loopback://", &token("B", "room1")).await.unwrap();
        a.events.recv().await;

        assert!(hub.kick("room1", "B", "removed by moderator"));
        assert!(!hub.kick("room1", "B", "again"));

        assert_eq!(
            b.events.recv().await,
            Some(TransportEvent::Disconnected { reason: "removed by moderator".into() })
        );
        assert_eq!(a.events.recv().await, Some(TransportEvent::ParticipantLeft { identity: "B".into() }));
    }

    #[tokio::test]
    async fn test_full_member_channel_never_blocks_the_hub() {
        let hub = LoopbackHub::with_capacity(2);
        let a = hub.connect("loopback://", &token("A", "room1")).await.unwrap();
        // B never drains its channel
        let _b = hub.connect("loopback://", &token("B", "room1")).await.unwrap();

        let payload = || Bytes::from_static(b"{\"text\":\"hi\"}");
        a.connection.broadcast(payload(), BroadcastOptions::reliable()).await.unwrap();
        a.connection.broadcast(payload(), BroadcastOptions::reliable()).await.unwrap();

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            a.connection.broadcast(payload(), BroadcastOptions::reliable()),
        )
        .await
        .expect("reliable broadcast waited on a full channel")
        .unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));

        a.connection.broadcast(payload(), BroadcastOptions::lossy()).await.unwrap();

        // Joins and kicks are not held up by the full member either
        let _c = tokio::time::timeout(std::time::Duration::from_secs(1), hub.connect("loopback://", &token("C", "room1")))
            .await
            .expect("connect waited on a full channel")
            .unwrap();
        assert!(hub.kick("room1", "C", "done"));
        assert_eq!(hub.members("room1"), vec!["A", "B"]);
    }
}

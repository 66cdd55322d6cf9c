//! Connected sockets and the roster of registered users.
//!
//! Every fan-out happens while the map's write lock is held, so each socket
//! sees roster broadcasts in the order the registry changed.

use std::collections::HashMap;
use std::sync::Arc;

use telecall_common::Signal;
use telecall_common::models::{ConnectionId, PeerRosterEntry};
use telecall_common::signal::{RosterUpdate, UserRegistration};
use tokio::sync::{RwLock, mpsc};

use crate::error::{SignalError, SignalResult};

struct Peer {
    outbound: mpsc::UnboundedSender<Signal>,
    /// Set once the socket has sent `register-user`
    entry: Option<PeerRosterEntry>,
    /// Registration order; keeps the roster stable across broadcasts
    registered_seq: u64,
}

#[derive(Default)]
struct Peers {
    by_id: HashMap<ConnectionId, Peer>,
    next_seq: u64,
}

impl Peers {
    fn roster(&self) -> Vec<PeerRosterEntry> {
        let mut entries: Vec<(u64, &PeerRosterEntry)> = self
            .by_id
            .values()
            .filter_map(|p| p.entry.as_ref().map(|e| (p.registered_seq, e)))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, e)| e.clone()).collect()
    }

    fn broadcast(&self, signal: &Signal) {
        for peer in self.by_id.values() {
            let _ = peer.outbound.send(signal.clone());
        }
    }
}

/// Tracks all open signaling sockets.
pub struct PeerRegistry {
    peers: Arc<RwLock<Peers>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(Peers::default())),
        }
    }

    /// Track a freshly opened socket. It is not on the roster until it registers.
    pub async fn connect(&self, id: ConnectionId, outbound: mpsc::UnboundedSender<Signal>) {
        self.peers.write().await.by_id.insert(
            id,
            Peer {
                outbound,
                entry: None,
                registered_seq: 0,
            },
        );
    }

    /// Store or replace the roster entry for `id` and broadcast `user-joined`
    /// with the full roster to every socket.
    pub async fn register(
        &self,
        id: &ConnectionId,
        registration: UserRegistration,
    ) -> SignalResult<RosterUpdate> {
        let mut peers = self.peers.write().await;
        if !peers.by_id.contains_key(id) {
            return Err(SignalError::NotConnected { connection_id: id.clone() });
        }

        // One roster entry per user: a newer socket displaces older ones.
        if let Some(user_id) = registration.user_id.as_deref() {
            for (other_id, other) in peers.by_id.iter_mut() {
                let same_user = other
                    .entry
                    .as_ref()
                    .is_some_and(|e| e.user_id.as_deref() == Some(user_id));
                if other_id != id && same_user {
                    tracing::debug!(
                        connection = %other_id,
                        user_id,
                        "Superseded by a newer registration"
                    );
                    other.entry = None;
                }
            }
        }

        let next_seq = peers.next_seq;
        let peer = peers
            .by_id
            .get_mut(id)
            .ok_or_else(|| SignalError::NotConnected { connection_id: id.clone() })?;

        if peer.entry.is_none() {
            peer.registered_seq = next_seq;
        }
        peer.entry = Some(PeerRosterEntry {
            id: id.clone(),
            user_id: registration.user_id,
            username: registration.username.clone(),
        });
        peers.next_seq += 1;

        let update = RosterUpdate {
            user_id: id.clone(),
            username: Some(registration.username),
            users: peers.roster(),
        };
        peers.broadcast(&Signal::UserJoined(update.clone()));
        Ok(update)
    }

    /// Forget a closed socket. If it was registered, every remaining socket
    /// gets `user-left` with the new roster, which is also returned.
    pub async fn remove(&self, id: &ConnectionId) -> Option<RosterUpdate> {
        let mut peers = self.peers.write().await;
        let entry = peers.by_id.remove(id)?.entry?;

        let update = RosterUpdate {
            user_id: id.clone(),
            username: Some(entry.username),
            users: peers.roster(),
        };
        peers.broadcast(&Signal::UserLeft(update.clone()));
        Some(update)
    }

    /// Queue a signal for one socket.
    pub async fn send_to(&self, id: &ConnectionId, signal: Signal) -> SignalResult<()> {
        let peers = self.peers.read().await;
        let peer = peers
            .by_id
            .get(id)
            .ok_or_else(|| SignalError::UnknownPeer { connection_id: id.clone() })?;
        peer.outbound
            .send(signal)
            .map_err(|_| SignalError::NotConnected { connection_id: id.clone() })
    }

    /// Queue the same signal for several sockets; unknown ids are skipped.
    pub async fn send_to_all(&self, ids: &[ConnectionId], signal: &Signal) {
        let peers = self.peers.read().await;
        for id in ids {
            if let Some(peer) = peers.by_id.get(id) {
                let _ = peer.outbound.send(signal.clone());
            }
        }
    }

    pub async fn roster(&self) -> Vec<PeerRosterEntry> {
        self.peers.read().await.roster()
    }

    /// Open sockets, registered or not.
    pub async fn active_count(&self) -> usize {
        self.peers.read().await.by_id.len()
    }

    pub async fn registered_count(&self) -> usize {
        self.peers
            .read()
            .await
            .by_id
            .values()
            .filter(|p| p.entry.is_some())
            .count()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

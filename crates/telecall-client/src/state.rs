//! Client state: the one observable aggregate the UI renders from.
//!
//! Four slices, each written by exactly one component:
//! - `connection`: transport status, our address, registration outcome (registry)
//! - `roster`: last full roster snapshot (registry)
//! - `call`: call status and remote party (call controller)
//! - `chat`: current room and its ordered messages (side-channel relay)
//!
//! Snapshots are published over a `watch` channel; discrete happenings
//! (incoming call, call ended, ...) go out on a `broadcast` stream.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use telecall_common::CallError;
use telecall_common::models::{ConnectionId, Roster, RoomMessage, UserIdentity};
use tokio::sync::{broadcast, watch};

/// Display name shown for the remote tile when no call is up.
pub const REMOTE_PLACEHOLDER: &str = "Remote User";

/// How many dead addresses a client remembers.
pub const MAX_STALE_IDS: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportStatus {
    #[default]
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistrationStatus {
    #[default]
    Unregistered,
    Pending,
    Registered,
    TimedOut,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionView {
    pub transport: TransportStatus,
    pub local_id: Option<ConnectionId>,
    pub identity: Option<UserIdentity>,
    pub registration: RegistrationStatus,
    /// Bumped on every (re)connect
    pub epoch: u64,
    /// Addresses from earlier connections; dead for good
    pub stale_ids: StaleIds,
}

impl ConnectionView {
    pub fn is_stale(&self, id: &ConnectionId) -> bool {
        self.stale_ids.contains(id)
    }
}

/// Recently invalidated connection ids, oldest evicted first once
/// [`MAX_STALE_IDS`] is reached. The server never reissues an id, so an
/// evicted one is only ever dropped server-side as an unknown target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleIds {
    order: VecDeque<ConnectionId>,
    members: BTreeSet<ConnectionId>,
}

impl StaleIds {
    pub fn insert(&mut self, id: ConnectionId) {
        if !self.members.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > MAX_STALE_IDS {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Extend<ConnectionId> for StaleIds {
    fn extend<I: IntoIterator<Item = ConnectionId>>(&mut self, ids: I) {
        for id in ids {
            self.insert(id);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallStatus {
    #[default]
    Idle,
    /// Offer sent, waiting for answer/connectivity
    Calling,
    /// Incoming offer waiting for accept/decline
    Ringing,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallView {
    pub from: ConnectionId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallView {
    pub status: CallStatus,
    pub remote: Option<ConnectionId>,
    pub remote_display_name: String,
    pub incoming: Option<IncomingCallView>,
    /// Seconds left on the session timer once connected
    pub remaining_secs: Option<u64>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    /// Why the previous call ended
    pub last_end_reason: Option<CallError>,
}

impl Default for CallView {
    fn default() -> Self {
        Self {
            status: CallStatus::Idle,
            remote: None,
            remote_display_name: REMOTE_PLACEHOLDER.into(),
            incoming: None,
            remaining_secs: None,
            audio_enabled: true,
            video_enabled: true,
            last_end_reason: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatView {
    pub room_id: Option<String>,
    /// Ordered by id (server-receipt order), no duplicates
    pub messages: Vec<RoomMessage>,
    pub transcript_enabled: bool,
}

impl ChatView {
    /// Merge messages from any source; returns how many were new.
    ///
    /// History and live delivery overlap, so the id is the merge key and
    /// the list is kept sorted by it.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = RoomMessage>) -> usize {
        let mut added = 0;
        for msg in incoming {
            if let Err(pos) = self.messages.binary_search_by(|m| m.id.cmp(&msg.id)) {
                self.messages.insert(pos, msg);
                added += 1;
            }
        }
        added
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub connection: ConnectionView,
    pub roster: Roster,
    pub call: CallView,
    pub chat: ChatView,
}

/// Discrete notifications for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Registered { connection_id: ConnectionId },
    RegistrationTimedOut(CallError),
    IncomingCall { from: ConnectionId, username: String },
    CallConnected { remote: ConnectionId },
    CallEnded { reason: CallError },
    MessageReceived(RoomMessage),
    HistoryUnavailable { room_id: String, message: String },
    /// Non-fatal problem worth surfacing (e.g. camera refused at registration)
    Warning(CallError),
}

/// Shared handle to the aggregate state.
#[derive(Clone)]
pub struct ClientState {
    snapshot: Arc<watch::Sender<ClientSnapshot>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientState {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(ClientSnapshot::default());
        let (events, _) = broadcast::channel(256);
        Self {
            snapshot: Arc::new(snapshot),
            events,
        }
    }

    /// Watch the full snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ClientSnapshot> {
        self.snapshot.subscribe()
    }

    /// Subscribe to discrete client events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn connection(&self) -> ConnectionView {
        self.snapshot.borrow().connection.clone()
    }

    pub fn call(&self) -> CallView {
        self.snapshot.borrow().call.clone()
    }

    pub fn update_connection(&self, f: impl FnOnce(&mut ConnectionView)) {
        self.snapshot.send_modify(|s| f(&mut s.connection));
    }

    pub fn replace_roster(&self, roster: Roster) {
        self.snapshot.send_modify(|s| s.roster = roster);
    }

    pub fn update_call(&self, f: impl FnOnce(&mut CallView)) {
        self.snapshot.send_modify(|s| f(&mut s.call));
    }

    pub fn update_chat(&self, f: impl FnOnce(&mut ChatView)) {
        self.snapshot.send_modify(|s| f(&mut s.chat));
    }

    pub fn emit(&self, event: ClientEvent) {
        // No subscribers is fine; the snapshot still carries the state.
        let _ = self.events.send(event);
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

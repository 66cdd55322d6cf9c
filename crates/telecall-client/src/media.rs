//! Media seam: local capture and the peer connection, behind traits.
//!
//! The client never touches RTP, DTLS or codecs. An embedding application
//! supplies a [`MediaEngine`] (browser bridge, native WebRTC stack, ...) and
//! the negotiator drives it through [`PeerConnection`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use telecall_common::models::{AddressFamily, IceCandidate, IceServer, SessionDescription};
use tokio::sync::mpsc;

/// Failure reported by the media engine. Mapped to a [`telecall_common::CallError`]
/// by whoever knows which step failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MediaError(pub String);

impl MediaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One captured track. Clones share the enabled flag.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    enabled: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// Camera and microphone capture, acquired once per registration and
/// shared with every negotiator.
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<MediaTrack>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Video)
    }

    /// Flip every track of `kind`. Returns the new state, or `None` when no
    /// such track was captured.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let mut tracks = self.tracks.iter().filter(|t| t.kind == kind).peekable();
        let enabled = !tracks.peek()?.is_enabled();
        for track in tracks {
            track.set_enabled(enabled);
        }
        Some(enabled)
    }
}

/// Connectivity state reported by the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Identifies one negotiator; events from older sessions are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub session: SessionId,
    pub kind: PeerEventKind,
}

/// Callback target handed to the engine for one peer connection.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.push(PeerEventKind::LocalCandidate(candidate));
    }

    pub fn state_changed(&self, state: PeerState) {
        self.push(PeerEventKind::StateChanged(state));
    }

    fn push(&self, kind: PeerEventKind) {
        // Client loop gone means nobody cares any more.
        let _ = self.tx.send(PeerEvent {
            session: self.session,
            kind,
        });
    }
}

/// One peer connection as exposed by the media engine.
#[async_trait]
pub trait PeerConnection: Send {
    async fn attach_track(&mut self, track: &MediaTrack) -> Result<(), MediaError>;

    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn set_remote_description(&mut self, desc: SessionDescription)
    -> Result<(), MediaError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Detach tracks and release the transport. Must not stop the tracks.
    async fn close(&mut self);
}

/// Factory for local capture and peer connections.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn acquire_local_media(&self) -> Result<LocalMedia, MediaError>;

    /// Build a connection whose local candidates and state changes are
    /// reported through `events`.
    async fn create_peer_connection(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, MediaError>;
}

/// Decides which local candidates are sent to the remote peer.
pub trait CandidateFilter: Send + Sync {
    fn allow(&self, candidate: &IceCandidate) -> bool;
}

/// Sends everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl CandidateFilter for AllowAll {
    fn allow(&self, _candidate: &IceCandidate) -> bool {
        true
    }
}

/// Drops candidates whose connection address is IPv6.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropIpv6;

impl CandidateFilter for DropIpv6 {
    fn allow(&self, candidate: &IceCandidate) -> bool {
        candidate.address_family() != AddressFamily::Ipv6
    }
}

impl<F> CandidateFilter for F
where
    F: Fn(&IceCandidate) -> bool + Send + Sync,
{
    fn allow(&self, candidate: &IceCandidate) -> bool {
        self(candidate)
    }
}

/// Default filter for the `drop_ipv6_candidates` setting.
pub fn filter_from_config(drop_ipv6: bool) -> Arc<dyn CandidateFilter> {
    if drop_ipv6 {
        Arc::new(DropIpv6)
    } else {
        Arc::new(AllowAll)
    }
}

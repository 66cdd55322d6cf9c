//! In-process doubles for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use telecall_common::models::{IceCandidate, IceServer, RoomMessage, SdpType, SessionDescription};

use crate::error::{ClientError, Result};
use crate::media::{
    LocalMedia, MediaEngine, MediaError, MediaTrack, PeerConnection, PeerEventSink, SessionId,
    TrackKind,
};
use crate::rest::HistorySource;
use crate::transport::{SignalingTransport, TransportEvent, TransportLink};

/// Transport already marked connected, with the inbound queue discarded.
pub fn connected_transport() -> (SignalingTransport, TransportLink) {
    let (transport, link, _events) = SignalingTransport::channel();
    link.deliver(TransportEvent::Connected);
    (transport, link)
}

/// One call made on a mock peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOp {
    AttachTrack(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

#[derive(Default)]
struct EngineLog {
    ops: Vec<(SessionId, PeerOp)>,
    sinks: HashMap<SessionId, PeerEventSink>,
    created: Vec<SessionId>,
    live: usize,
    max_live: usize,
}

/// Media engine that records every operation.
///
/// `sdp == "bad"` fails description calls; candidates containing `"bogus"`
/// fail to apply.
#[derive(Clone, Default)]
pub struct MockEngine {
    log: Arc<Mutex<EngineLog>>,
    deny_media: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose camera/microphone request is refused.
    pub fn denying_media() -> Self {
        Self {
            deny_media: true,
            ..Self::default()
        }
    }

    pub fn ops(&self, session: SessionId) -> Vec<PeerOp> {
        let log = self.log.lock().unwrap();
        log.ops
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, op)| op.clone())
            .collect()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.log.lock().unwrap().created.clone()
    }

    pub fn last_session(&self) -> Option<SessionId> {
        self.log.lock().unwrap().created.last().copied()
    }

    pub fn sink(&self, session: SessionId) -> Option<PeerEventSink> {
        self.log.lock().unwrap().sinks.get(&session).cloned()
    }

    pub fn live_connections(&self) -> usize {
        self.log.lock().unwrap().live
    }

    /// Highest number of simultaneously open connections seen.
    pub fn max_live_connections(&self) -> usize {
        self.log.lock().unwrap().max_live
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn acquire_local_media(&self) -> std::result::Result<LocalMedia, MediaError> {
        if self.deny_media {
            return Err(MediaError::new("permission denied"));
        }
        Ok(LocalMedia::new(vec![
            MediaTrack::new("mic", TrackKind::Audio),
            MediaTrack::new("cam", TrackKind::Video),
        ]))
    }

    async fn create_peer_connection(
        &self,
        _ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> std::result::Result<Box<dyn PeerConnection>, MediaError> {
        let session = events.session();
        let mut log = self.log.lock().unwrap();
        log.created.push(session);
        log.sinks.insert(session, events);
        log.live += 1;
        log.max_live = log.max_live.max(log.live);
        Ok(Box::new(MockConnection {
            session,
            log: Arc::clone(&self.log),
            closed: false,
        }))
    }
}

struct MockConnection {
    session: SessionId,
    log: Arc<Mutex<EngineLog>>,
    closed: bool,
}

impl MockConnection {
    fn record(&self, op: PeerOp) {
        self.log.lock().unwrap().ops.push((self.session, op));
    }

    fn check(desc: &SessionDescription) -> std::result::Result<(), MediaError> {
        if desc.sdp == "bad" {
            Err(MediaError::new("malformed sdp"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn attach_track(&mut self, track: &MediaTrack) -> std::result::Result<(), MediaError> {
        self.record(PeerOp::AttachTrack(track.id.clone()));
        Ok(())
    }

    async fn create_offer(&mut self) -> std::result::Result<SessionDescription, MediaError> {
        self.record(PeerOp::CreateOffer);
        Ok(SessionDescription::offer(format!("offer-{}", self.session)))
    }

    async fn create_answer(&mut self) -> std::result::Result<SessionDescription, MediaError> {
        self.record(PeerOp::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer-{}", self.session)))
    }

    async fn set_local_description(
        &mut self,
        desc: SessionDescription,
    ) -> std::result::Result<(), MediaError> {
        Self::check(&desc)?;
        self.record(PeerOp::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> std::result::Result<(), MediaError> {
        self.record(PeerOp::SetRemote(desc.kind));
        Self::check(&desc)
    }

    async fn add_ice_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> std::result::Result<(), MediaError> {
        if candidate.candidate.contains("bogus") {
            return Err(MediaError::new("unparseable candidate"));
        }
        self.record(PeerOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.record(PeerOp::Close);
        let mut log = self.log.lock().unwrap();
        log.live = log.live.saturating_sub(1);
    }
}

/// History source with canned responses per room.
#[derive(Clone, Default)]
pub struct StaticHistory {
    rooms: Arc<Mutex<HashMap<String, Vec<RoomMessage>>>>,
    failing: bool,
}

impl StaticHistory {
    pub fn with_room(room_id: &str, messages: Vec<RoomMessage>) -> Self {
        let history = Self::default();
        history
            .rooms
            .lock()
            .unwrap()
            .insert(room_id.to_owned(), messages);
        history
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl HistorySource for StaticHistory {
    async fn fetch_history(&self, room_id: &str) -> Result<Vec<RoomMessage>> {
        if self.failing {
            return Err(ClientError::Api {
                status: 503,
                message: "history unavailable".into(),
            });
        }
        Ok(self
            .rooms
            .lock()
            .unwrap()
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }
}

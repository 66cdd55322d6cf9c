//! Session negotiator: one offer/answer/ICE exchange, start to finish.
//!
//! ```text
//! Idle ──send_offer──▶ OfferCreated ──apply_answer──┐
//!                                                   ├─▶ AnswerExchanged ──▶ Connected ──▶ Closed
//! OfferReceived ──accept_offer──────────────────────┘
//!        any non-terminal ──description failure──▶ Failed
//! ```
//!
//! Remote candidates that arrive before the remote description are held in
//! `early_candidates` and applied, in receipt order, right after the remote
//! description is set. Applying a candidate with no remote description is an
//! error on every WebRTC stack, and dropping it can cost the only working
//! path, so nothing is applied early and nothing is discarded.

use std::sync::Arc;

use telecall_common::models::{ConnectionId, IceCandidate, IceServer, SessionDescription};
use telecall_common::signal::{AnswerPayload, CandidatePayload, OfferPayload};
use telecall_common::{CallError, CallResult, Signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::media::{
    CandidateFilter, LocalMedia, MediaEngine, PeerConnection, PeerEvent, PeerEventSink, PeerState,
    SessionId,
};
use crate::transport::SignalingTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferCreated,
    OfferReceived,
    AnswerExchanged,
    Connected,
    Closed,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Everything a negotiator needs besides the engine.
pub struct NegotiatorSetup<'a> {
    pub session: SessionId,
    pub role: Role,
    pub local: ConnectionId,
    pub remote: ConnectionId,
    pub media: Arc<LocalMedia>,
    pub ice_servers: &'a [IceServer],
    pub filter: Arc<dyn CandidateFilter>,
    pub transport: SignalingTransport,
    pub peer_events: mpsc::UnboundedSender<PeerEvent>,
}

pub struct SessionNegotiator {
    session: SessionId,
    role: Role,
    state: NegotiationState,
    local: ConnectionId,
    remote: ConnectionId,
    connection: Box<dyn PeerConnection>,
    remote_description_set: bool,
    early_candidates: Vec<IceCandidate>,
    filter: Arc<dyn CandidateFilter>,
    transport: SignalingTransport,
    // Held so the tracks outlive the connection they are attached to.
    _media: Arc<LocalMedia>,
}

impl SessionNegotiator {
    /// Build the peer connection and attach the shared local tracks.
    pub async fn open(engine: &dyn MediaEngine, setup: NegotiatorSetup<'_>) -> CallResult<Self> {
        let NegotiatorSetup {
            session,
            role,
            local,
            remote,
            media,
            ice_servers,
            filter,
            transport,
            peer_events,
        } = setup;

        let sink = PeerEventSink::new(session, peer_events);
        let mut connection = engine
            .create_peer_connection(ice_servers, sink)
            .await
            .map_err(|e| CallError::MediaAccessDenied(e.to_string()))?;

        for track in media.tracks() {
            if let Err(e) = connection.attach_track(track).await {
                connection.close().await;
                return Err(CallError::MediaAccessDenied(e.to_string()));
            }
        }

        let state = match role {
            Role::Caller => NegotiationState::Idle,
            Role::Callee => NegotiationState::OfferReceived,
        };
        debug!(%session, %remote, ?role, "Negotiator opened");

        Ok(Self {
            session,
            role,
            state,
            local,
            remote,
            connection,
            remote_description_set: false,
            early_candidates: Vec::new(),
            filter,
            transport,
            _media: media,
        })
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn remote(&self) -> &ConnectionId {
        &self.remote
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn buffered_candidates(&self) -> usize {
        self.early_candidates.len()
    }

    // ── Caller ──

    /// Create the offer, make it ours and send it to the remote peer.
    pub async fn send_offer(&mut self, username: &str) -> CallResult<()> {
        if self.role != Role::Caller || self.state != NegotiationState::Idle {
            return Err(CallError::Protocol(format!(
                "Cannot send offer from {:?}",
                self.state
            )));
        }

        let offer = match self.connection.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(CallError::OfferRejected(e.to_string()))),
        };
        if let Err(e) = self.connection.set_local_description(offer.clone()).await {
            return Err(self.fail(CallError::OfferRejected(e.to_string())));
        }
        self.state = NegotiationState::OfferCreated;

        self.transport.send(Signal::Offer(OfferPayload {
            to: self.remote.clone(),
            from: self.local.clone(),
            offer,
            username: username.to_owned(),
        }))?;
        info!(session = %self.session, to = %self.remote, "Offer sent");
        Ok(())
    }

    /// Apply the callee's answer, then everything that was waiting on it.
    ///
    /// A second answer for the same session is ignored.
    pub async fn apply_answer(&mut self, answer: SessionDescription) -> CallResult<()> {
        if self.role != Role::Caller || self.state != NegotiationState::OfferCreated {
            debug!(session = %self.session, state = ?self.state, "Ignoring unexpected answer");
            return Ok(());
        }

        if let Err(e) = self.connection.set_remote_description(answer).await {
            return Err(self.fail(CallError::AnswerRejected(e.to_string())));
        }
        self.remote_description_set = true;
        self.flush_early_candidates().await;
        self.state = NegotiationState::AnswerExchanged;
        info!(session = %self.session, "Answer applied");
        Ok(())
    }

    // ── Callee ──

    /// Candidates that arrived with the offer, before this negotiator existed.
    pub fn buffer_candidates(&mut self, candidates: impl IntoIterator<Item = IceCandidate>) {
        self.early_candidates.extend(candidates);
    }

    /// Take the held offer, answer it and send the answer back.
    pub async fn accept_offer(&mut self, offer: SessionDescription) -> CallResult<()> {
        if self.role != Role::Callee || self.state != NegotiationState::OfferReceived {
            return Err(CallError::Protocol(format!(
                "Cannot accept offer from {:?}",
                self.state
            )));
        }

        if let Err(e) = self.connection.set_remote_description(offer).await {
            return Err(self.fail(CallError::OfferRejected(e.to_string())));
        }
        self.remote_description_set = true;
        self.flush_early_candidates().await;

        let answer = match self.connection.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(CallError::AnswerRejected(e.to_string()))),
        };
        if let Err(e) = self.connection.set_local_description(answer.clone()).await {
            return Err(self.fail(CallError::AnswerRejected(e.to_string())));
        }
        self.state = NegotiationState::AnswerExchanged;

        self.transport.send(Signal::Answer(AnswerPayload {
            to: self.remote.clone(),
            from: self.local.clone(),
            answer,
        }))?;
        info!(session = %self.session, to = %self.remote, "Answer sent");
        Ok(())
    }

    // ── Candidates ──

    /// Apply now if the remote description is in place, otherwise hold it.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.state.is_terminal() {
            return;
        }
        if self.remote_description_set {
            self.apply_candidate(candidate).await;
        } else {
            debug!(
                session = %self.session,
                buffered = self.early_candidates.len() + 1,
                "Buffering early candidate"
            );
            self.early_candidates.push(candidate);
        }
    }

    /// Send one locally gathered candidate, unless the filter rejects it.
    pub fn send_local_candidate(&self, candidate: IceCandidate) -> CallResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if !self.filter.allow(&candidate) {
            debug!(session = %self.session, candidate = %candidate.candidate, "Local candidate filtered");
            return Ok(());
        }
        self.transport.send(Signal::IceCandidate(CandidatePayload {
            to: self.remote.clone(),
            from: self.local.clone(),
            candidate,
        }))
    }

    async fn flush_early_candidates(&mut self) {
        let pending = std::mem::take(&mut self.early_candidates);
        if !pending.is_empty() {
            debug!(session = %self.session, count = pending.len(), "Flushing early candidates");
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        if let Err(e) = self.connection.add_ice_candidate(candidate).await {
            let err = CallError::IceApplyFailed(e.to_string());
            warn!(session = %self.session, code = err.reason_code(), "{err}");
        }
    }

    // ── Lifecycle ──

    /// Track the connection's own state. Returns the new negotiation state.
    pub fn on_peer_state(&mut self, peer: PeerState) -> NegotiationState {
        if self.state.is_terminal() {
            return self.state;
        }
        match peer {
            PeerState::Connected => self.state = NegotiationState::Connected,
            PeerState::Failed => self.state = NegotiationState::Failed,
            PeerState::Closed => self.state = NegotiationState::Closed,
            PeerState::New | PeerState::Connecting | PeerState::Disconnected => {}
        }
        self.state
    }

    /// Release the connection. Safe to call more than once; the shared
    /// tracks are left running.
    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.connection.close().await;
        self.early_candidates.clear();
        self.state = NegotiationState::Closed;
        debug!(session = %self.session, "Negotiator closed");
    }

    fn fail(&mut self, err: CallError) -> CallError {
        warn!(session = %self.session, code = err.reason_code(), "Negotiation failed: {err}");
        self.state = NegotiationState::Failed;
        err
    }
}

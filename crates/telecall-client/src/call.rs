//! Call controller: lifecycle above the negotiator.
//!
//! ```text
//! Idle ──start_call──▶ Calling ──peer connected──▶ Active
//! Idle ──offer──▶ Ringing ──accept──▶ Active (timer starts once connected)
//!                 Ringing ──decline──▶ Idle
//! any ──hang-up / end-call / declined / timeout / failure / transport loss──▶ Idle
//! ```
//!
//! Every way out of a call goes through [`CallController::teardown`], which
//! is idempotent: at most one negotiator is ever live, and a call that is
//! already gone cannot be ended twice.

use std::sync::Arc;
use std::time::Duration;

use telecall_common::config::ClientConfig;
use telecall_common::models::{ConnectionId, IceCandidate, IceServer, SessionDescription};
use telecall_common::signal::{AnswerPayload, CandidatePayload, OfferPayload, Route};
use telecall_common::{CallError, CallResult, Signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::media::{
    CandidateFilter, LocalMedia, MediaEngine, PeerEvent, PeerEventKind, PeerState, SessionId,
    TrackKind,
};
use crate::negotiator::{NegotiationState, NegotiatorSetup, Role, SessionNegotiator};
use crate::scheduler::{ScheduledTask, Scheduler, Tick, TimerKind};
use crate::state::{
    CallStatus, CallView, ClientEvent, ClientState, IncomingCallView, REMOTE_PLACEHOLDER,
};
use crate::transport::SignalingTransport;

/// Offer waiting for the user to accept or decline.
struct IncomingCallOffer {
    from: ConnectionId,
    username: String,
    offer: SessionDescription,
    /// Caller's candidates that arrived while ringing
    early_candidates: Vec<IceCandidate>,
}

pub struct CallController {
    state: ClientState,
    transport: SignalingTransport,
    engine: Arc<dyn MediaEngine>,
    filter: Arc<dyn CandidateFilter>,
    scheduler: Scheduler,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
    ice_servers: Vec<IceServer>,
    call_duration_secs: u64,
    media: Option<Arc<LocalMedia>>,
    negotiator: Option<SessionNegotiator>,
    incoming: Option<IncomingCallOffer>,
    countdown: Option<ScheduledTask>,
    remaining_secs: u64,
    next_session: u64,
}

impl CallController {
    pub fn new(
        state: ClientState,
        transport: SignalingTransport,
        engine: Arc<dyn MediaEngine>,
        filter: Arc<dyn CandidateFilter>,
        scheduler: Scheduler,
        peer_events: mpsc::UnboundedSender<PeerEvent>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            state,
            transport,
            engine,
            filter,
            scheduler,
            peer_events,
            ice_servers: config.ice_servers.clone(),
            call_duration_secs: config.call_duration_secs,
            media: None,
            negotiator: None,
            incoming: None,
            countdown: None,
            remaining_secs: 0,
            next_session: 0,
        }
    }

    pub fn negotiation_state(&self) -> Option<NegotiationState> {
        self.negotiator.as_ref().map(SessionNegotiator::state)
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.negotiator.as_ref().map(SessionNegotiator::session)
    }

    // ── Local media ──

    /// Acquire camera and microphone ahead of the first call. A refusal is
    /// only a warning here; it becomes fatal when a call needs the media.
    pub async fn prepare_media(&mut self) {
        if let Err(e) = self.ensure_media().await {
            warn!(code = e.reason_code(), "{e}");
            self.state.emit(ClientEvent::Warning(e));
        }
    }

    async fn ensure_media(&mut self) -> CallResult<Arc<LocalMedia>> {
        if let Some(media) = &self.media {
            return Ok(Arc::clone(media));
        }
        let media = self
            .engine
            .acquire_local_media()
            .await
            .map_err(|e| CallError::MediaAccessDenied(e.to_string()))?;
        let media = Arc::new(media);
        self.media = Some(Arc::clone(&media));
        info!(tracks = media.tracks().len(), "Local media acquired");
        Ok(media)
    }

    pub fn toggle_audio(&mut self) -> Option<bool> {
        let enabled = self.media.as_ref()?.toggle(TrackKind::Audio)?;
        self.state.update_call(|c| c.audio_enabled = enabled);
        Some(enabled)
    }

    pub fn toggle_video(&mut self) -> Option<bool> {
        let enabled = self.media.as_ref()?.toggle(TrackKind::Video)?;
        self.state.update_call(|c| c.video_enabled = enabled);
        Some(enabled)
    }

    // ── Outgoing ──

    /// Call `target`, ending whatever call or prompt came before.
    pub async fn start_call(&mut self, target: ConnectionId, display_name: &str) -> CallResult<()> {
        let local = self.local_id()?;
        if self.state.connection().is_stale(&target) {
            return Err(CallError::AddressStale {
                connection_id: target,
            });
        }

        let media = match self.ensure_media().await {
            Ok(media) => media,
            Err(e) => {
                warn!(code = e.reason_code(), "{e}");
                self.state.update_call(|c| c.last_end_reason = Some(e.clone()));
                return Err(e);
            }
        };

        self.teardown(CallError::HungUp, true).await;

        let mut negotiator = self
            .open_negotiator(Role::Caller, local, target.clone(), media)
            .await?;
        let remote_name = if display_name.is_empty() {
            REMOTE_PLACEHOLDER
        } else {
            display_name
        };
        self.state.update_call(|c| {
            c.status = CallStatus::Calling;
            c.remote = Some(target.clone());
            c.remote_display_name = remote_name.to_owned();
            c.incoming = None;
            c.remaining_secs = None;
            c.last_end_reason = None;
        });
        info!(session = %negotiator.session(), to = %target, "Calling");

        let result = negotiator.send_offer(&self.local_name()).await;
        self.negotiator = Some(negotiator);
        if let Err(e) = result {
            self.teardown(e.clone(), false).await;
            return Err(e);
        }
        Ok(())
    }

    /// Caller side: the callee answered.
    pub async fn on_answer(&mut self, payload: AnswerPayload) {
        let Some(negotiator) = self.current_with(&payload.from) else {
            debug!(from = %payload.from, "Ignoring answer for a superseded session");
            return;
        };
        if let Err(e) = negotiator.apply_answer(payload.answer).await {
            self.teardown(e, true).await;
        }
    }

    /// Caller side: the callee said no.
    pub async fn on_call_declined(&mut self, route: Route) {
        if self.current_with(&route.from).is_none() {
            debug!(from = %route.from, "Ignoring decline for a superseded session");
            return;
        }
        info!(from = %route.from, "Call declined");
        self.teardown(CallError::RemoteDeclined { from: route.from }, false)
            .await;
    }

    // ── Incoming ──

    /// Hold an offer and ring. While busy or already ringing, the new caller
    /// is turned away with `call-declined`.
    pub fn on_offer(&mut self, payload: OfferPayload) {
        let OfferPayload {
            from,
            offer,
            username,
            ..
        } = payload;

        match self.incoming.as_mut() {
            // Same caller offering again: the newer offer wins.
            Some(incoming) if incoming.from == from => {
                incoming.offer = offer;
                incoming.early_candidates.clear();
                return;
            }
            _ => {}
        }

        if self.negotiator.is_some() || self.incoming.is_some() {
            info!(from = %from, "Busy; declining offer");
            self.send_route(&from, Signal::CallDeclined);
            return;
        }

        let username = if username.is_empty() {
            REMOTE_PLACEHOLDER.to_owned()
        } else {
            username
        };
        info!(from = %from, %username, "Incoming call");
        self.state.update_call(|c| {
            c.status = CallStatus::Ringing;
            c.remote = Some(from.clone());
            c.remote_display_name = username.clone();
            c.incoming = Some(IncomingCallView {
                from: from.clone(),
                username: username.clone(),
            });
            c.last_end_reason = None;
        });
        self.state.emit(ClientEvent::IncomingCall {
            from: from.clone(),
            username: username.clone(),
        });
        self.incoming = Some(IncomingCallOffer {
            from,
            username,
            offer,
            early_candidates: Vec::new(),
        });
    }

    /// Answer the ringing call.
    pub async fn accept(&mut self) -> CallResult<()> {
        if self.incoming.is_none() {
            return Err(CallError::NoIncomingCall);
        }
        let local = self.local_id()?;

        let media = match self.ensure_media().await {
            Ok(media) => media,
            Err(e) => {
                // Caller is told no; the prompt goes away.
                self.teardown(e.clone(), true).await;
                return Err(e);
            }
        };

        let Some(incoming) = self.incoming.take() else {
            return Err(CallError::NoIncomingCall);
        };
        let mut negotiator = match self
            .open_negotiator(Role::Callee, local, incoming.from.clone(), media)
            .await
        {
            Ok(negotiator) => negotiator,
            Err(e) => {
                self.incoming = Some(incoming);
                self.teardown(e.clone(), true).await;
                return Err(e);
            }
        };
        negotiator.buffer_candidates(incoming.early_candidates);

        self.state.update_call(|c| {
            c.status = CallStatus::Active;
            c.remote = Some(incoming.from.clone());
            c.remote_display_name = incoming.username.clone();
            c.incoming = None;
        });
        info!(session = %negotiator.session(), from = %incoming.from, "Call accepted");

        let result = negotiator.accept_offer(incoming.offer).await;
        self.negotiator = Some(negotiator);
        if let Err(e) = result {
            self.teardown(e.clone(), true).await;
            return Err(e);
        }
        Ok(())
    }

    /// Refuse the ringing call. No negotiator is ever built for it.
    pub async fn decline(&mut self) -> CallResult<()> {
        if self.incoming.is_none() {
            return Err(CallError::NoIncomingCall);
        }
        self.teardown(CallError::HungUp, true).await;
        Ok(())
    }

    // ── Both sides ──

    pub async fn on_remote_candidate(&mut self, payload: CandidatePayload) {
        if let Some(negotiator) = self.current_with(&payload.from) {
            negotiator.add_remote_candidate(payload.candidate).await;
            return;
        }
        match self.incoming.as_mut() {
            Some(incoming) if incoming.from == payload.from => {
                incoming.early_candidates.push(payload.candidate);
            }
            _ => debug!(from = %payload.from, "Ignoring candidate for a superseded session"),
        }
    }

    pub async fn on_end_call(&mut self, route: Route) {
        let current = self
            .negotiator
            .as_ref()
            .map(|n| n.remote())
            .or(self.incoming.as_ref().map(|i| &i.from));
        if current != Some(&route.from) {
            debug!(from = %route.from, "Ignoring end-call for a superseded session");
            return;
        }
        info!(from = %route.from, "Remote ended the call");
        self.teardown(CallError::RemoteEnded, false).await;
    }

    /// Local candidates and connectivity changes from the media engine.
    pub async fn on_peer_event(&mut self, event: PeerEvent) {
        let Some(negotiator) = self
            .negotiator
            .as_mut()
            .filter(|n| n.session() == event.session)
        else {
            debug!(session = %event.session, "Ignoring event from a closed session");
            return;
        };

        match event.kind {
            PeerEventKind::LocalCandidate(candidate) => {
                if let Err(e) = negotiator.send_local_candidate(candidate) {
                    warn!(session = %event.session, "Candidate not sent: {e}");
                }
            }
            PeerEventKind::StateChanged(peer) => {
                let role = negotiator.role();
                let remote = negotiator.remote().clone();
                match negotiator.on_peer_state(peer) {
                    NegotiationState::Connected if self.countdown.is_none() => {
                        self.start_countdown(remote);
                    }
                    NegotiationState::Failed => {
                        let detail = "peer connection failed".to_owned();
                        let reason = match role {
                            Role::Caller => CallError::OfferRejected(detail),
                            Role::Callee => CallError::AnswerRejected(detail),
                        };
                        self.teardown(reason, true).await;
                    }
                    NegotiationState::Closed if peer == PeerState::Closed => {
                        self.teardown(CallError::RemoteEnded, false).await;
                    }
                    _ => {}
                }
            }
        }
    }

    /// End the call or dismiss the prompt. No-op when idle.
    pub async fn hang_up(&mut self) {
        self.teardown(CallError::HungUp, true).await;
    }

    pub async fn on_transport_lost(&mut self) {
        self.teardown(CallError::TransportDisconnected, false).await;
    }

    // ── Session timer ──

    fn start_countdown(&mut self, remote: ConnectionId) {
        self.remaining_secs = self.call_duration_secs;
        self.countdown = Some(
            self.scheduler
                .every(TimerKind::CallCountdown, Duration::from_secs(1)),
        );
        let remaining = self.remaining_secs;
        self.state.update_call(|c| {
            c.status = CallStatus::Active;
            c.remaining_secs = Some(remaining);
        });
        info!(%remote, secs = remaining, "Call connected");
        self.state.emit(ClientEvent::CallConnected { remote });
    }

    /// Returns `true` if the tick belonged to the session timer.
    pub async fn on_tick(&mut self, tick: &Tick) -> bool {
        if !self.countdown.as_ref().is_some_and(|t| t.owns(tick)) {
            return false;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        let remaining = self.remaining_secs;
        self.state.update_call(|c| c.remaining_secs = Some(remaining));

        if remaining == 0 {
            info!("Call time limit reached");
            self.teardown(CallError::CallTimedOut, true).await;
        }
        true
    }

    // ── Teardown ──

    /// The single exit path for a call or a ringing prompt.
    ///
    /// With `notify_remote`, the peer gets `end-call` (live call) or
    /// `call-declined` (prompt). Does nothing when there is nothing to end.
    pub async fn teardown(&mut self, reason: CallError, notify_remote: bool) {
        let negotiator = self.negotiator.take();
        let incoming = self.incoming.take();
        self.countdown = None;
        self.remaining_secs = 0;

        if negotiator.is_none() && incoming.is_none() {
            return;
        }

        if notify_remote {
            if let Some(negotiator) = &negotiator {
                self.send_route(negotiator.remote(), Signal::EndCall);
            } else if let Some(incoming) = &incoming {
                self.send_route(&incoming.from, Signal::CallDeclined);
            }
        }
        if let Some(mut negotiator) = negotiator {
            negotiator.close().await;
        }

        info!(code = reason.reason_code(), "Call ended: {reason}");
        self.state.update_call(|c| {
            *c = CallView {
                audio_enabled: c.audio_enabled,
                video_enabled: c.video_enabled,
                last_end_reason: Some(reason.clone()),
                ..CallView::default()
            };
        });
        self.state.emit(ClientEvent::CallEnded { reason });
    }

    // ── Internal ──

    fn local_id(&self) -> CallResult<ConnectionId> {
        self.state
            .connection()
            .local_id
            .ok_or(CallError::TransportDisconnected)
    }

    fn local_name(&self) -> String {
        self.state
            .connection()
            .identity
            .map(|i| i.display_name)
            .unwrap_or_default()
    }

    /// The live negotiator, if it talks to `peer`.
    fn current_with(&mut self, peer: &ConnectionId) -> Option<&mut SessionNegotiator> {
        self.negotiator
            .as_mut()
            .filter(|n| n.remote() == peer && !n.state().is_terminal())
    }

    async fn open_negotiator(
        &mut self,
        role: Role,
        local: ConnectionId,
        remote: ConnectionId,
        media: Arc<LocalMedia>,
    ) -> CallResult<SessionNegotiator> {
        self.next_session += 1;
        let setup = NegotiatorSetup {
            session: SessionId(self.next_session),
            role,
            local,
            remote,
            media,
            ice_servers: &self.ice_servers,
            filter: Arc::clone(&self.filter),
            transport: self.transport.clone(),
            peer_events: self.peer_events.clone(),
        };
        SessionNegotiator::open(self.engine.as_ref(), setup).await
    }

    /// Fire-and-forget `{to, from}` signal; dropped when we have no address.
    fn send_route(&self, to: &ConnectionId, build: impl FnOnce(Route) -> Signal) {
        let Some(from) = self.state.connection().local_id else {
            return;
        };
        let signal = build(Route {
            to: to.clone(),
            from,
        });
        if let Err(e) = self.transport.send(signal) {
            debug!(%to, "Signal not sent: {e}");
        }
    }
}

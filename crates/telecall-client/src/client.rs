//! The client event loop and the handle the UI drives it with.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telecall_client::{Client, Collaborators, HistoryClient};
//! use telecall_common::config::ClientConfig;
//! use telecall_common::models::UserIdentity;
//! # use telecall_client::media::MediaEngine;
//! # async fn demo(engine: Arc<dyn MediaEngine>) -> telecall_client::Result<()> {
//! let config = ClientConfig::default();
//! let history = Arc::new(HistoryClient::new(&config.api_base_url)?);
//! let (client, handle) = Client::connect(
//!     &config,
//!     Some(UserIdentity::account("u1", "Alice")),
//!     Collaborators { engine, history, candidate_filter: None },
//! );
//! tokio::spawn(client.run());
//!
//! handle.join_room("appt-7").await?;
//! handle.start_call("peer2".into(), "Bob").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use telecall_common::config::ClientConfig;
use telecall_common::models::{ConnectionId, UserIdentity};
use telecall_common::{CallResult, Signal};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::call::CallController;
use crate::error::{ClientError, Result};
use crate::media::{CandidateFilter, MediaEngine, PeerEvent, filter_from_config};
use crate::registry::Registration;
use crate::relay::{HistoryBatch, SideChannelRelay};
use crate::rest::HistorySource;
use crate::scheduler::{Scheduler, Tick, TimerKind};
use crate::state::{ClientEvent, ClientSnapshot, ClientState};
use crate::transport::{SignalingTransport, TransportEvent};

/// Injected collaborators.
pub struct Collaborators {
    pub engine: Arc<dyn MediaEngine>,
    pub history: Arc<dyn HistorySource>,
    /// Replaces the filter built from `drop_ipv6_candidates`
    pub candidate_filter: Option<Arc<dyn CandidateFilter>>,
}

type Reply<T> = oneshot::Sender<T>;

/// Requests from a [`ClientHandle`] to the event loop.
enum Command {
    Register(UserIdentity, Reply<CallResult<()>>),
    StartCall {
        target: ConnectionId,
        display_name: String,
        reply: Reply<CallResult<()>>,
    },
    Accept(Reply<CallResult<()>>),
    Decline(Reply<CallResult<()>>),
    HangUp(Reply<()>),
    ToggleAudio(Reply<Option<bool>>),
    ToggleVideo(Reply<Option<bool>>),
    JoinRoom(String, Reply<CallResult<()>>),
    SendMessage(String, Reply<CallResult<()>>),
    EnableTranscript(Reply<CallResult<()>>),
    PushTranscript(String),
    DisableTranscript,
    Shutdown,
}

/// Cheap, cloneable control surface for the UI.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: ClientState,
    transport: SignalingTransport,
}

impl ClientHandle {
    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// For registering extra per-event handlers with [`SignalingTransport::on`].
    pub fn transport(&self) -> &SignalingTransport {
        &self.transport
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientSnapshot> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.state.events()
    }

    pub async fn register(&self, identity: UserIdentity) -> Result<()> {
        Ok(self.request(|reply| Command::Register(identity, reply)).await??)
    }

    pub async fn start_call(&self, target: ConnectionId, display_name: &str) -> Result<()> {
        let display_name = display_name.to_owned();
        Ok(self
            .request(|reply| Command::StartCall {
                target,
                display_name,
                reply,
            })
            .await??)
    }

    pub async fn accept(&self) -> Result<()> {
        Ok(self.request(Command::Accept).await??)
    }

    pub async fn decline(&self) -> Result<()> {
        Ok(self.request(Command::Decline).await??)
    }

    pub async fn hang_up(&self) -> Result<()> {
        self.request(Command::HangUp).await
    }

    /// Returns the new audio state, or `None` if no microphone was captured.
    pub async fn toggle_audio(&self) -> Result<Option<bool>> {
        self.request(Command::ToggleAudio).await
    }

    pub async fn toggle_video(&self) -> Result<Option<bool>> {
        self.request(Command::ToggleVideo).await
    }

    pub async fn join_room(&self, room_id: &str) -> Result<()> {
        let room_id = room_id.to_owned();
        Ok(self.request(|reply| Command::JoinRoom(room_id, reply)).await??)
    }

    pub async fn send_message(&self, content: &str) -> Result<()> {
        let content = content.to_owned();
        Ok(self
            .request(|reply| Command::SendMessage(content, reply))
            .await??)
    }

    pub async fn enable_transcript(&self) -> Result<()> {
        Ok(self.request(Command::EnableTranscript).await??)
    }

    /// Feed recognised speech into the transcript buffer.
    pub fn push_transcript(&self, text: &str) -> Result<()> {
        self.post(Command::PushTranscript(text.to_owned()))
    }

    pub fn disable_transcript(&self) -> Result<()> {
        self.post(Command::DisableTranscript)
    }

    /// Hang up and stop the event loop.
    pub fn shutdown(&self) -> Result<()> {
        self.post(Command::Shutdown)
    }

    // ── Internal ──

    fn post(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.post(build(tx))?;
        rx.await.map_err(|_| ClientError::Closed)
    }
}

/// Owns every client component and runs them on one task.
pub struct Client {
    state: ClientState,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ticks: mpsc::UnboundedReceiver<Tick>,
    history: mpsc::UnboundedReceiver<HistoryBatch>,
    commands: mpsc::UnboundedReceiver<Command>,
    registration: Registration,
    calls: CallController,
    relay: SideChannelRelay,
}

impl Client {
    /// Connect to `config.signaling_url` over WebSocket.
    pub fn connect(
        config: &ClientConfig,
        identity: Option<UserIdentity>,
        collaborators: Collaborators,
    ) -> (Self, ClientHandle) {
        let (transport, events) = SignalingTransport::connect(config);
        Self::new(config, identity, transport, events, collaborators)
    }

    /// Build a client over an existing transport.
    pub fn new(
        config: &ClientConfig,
        identity: Option<UserIdentity>,
        transport: SignalingTransport,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        collaborators: Collaborators,
    ) -> (Self, ClientHandle) {
        let Collaborators {
            engine,
            history,
            candidate_filter,
        } = collaborators;

        let state = ClientState::new();
        state.update_connection(|c| c.identity = identity);

        let (scheduler, ticks) = Scheduler::new();
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let (history_tx, history_rx) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let filter = candidate_filter
            .unwrap_or_else(|| filter_from_config(config.drop_ipv6_candidates));

        let registration = Registration::new(
            state.clone(),
            transport.clone(),
            scheduler.clone(),
            config.registration_timeout_secs,
        );
        let calls = CallController::new(
            state.clone(),
            transport.clone(),
            engine,
            filter,
            scheduler.clone(),
            peer_tx,
            config,
        );
        let relay = SideChannelRelay::new(
            state.clone(),
            transport.clone(),
            history,
            history_tx,
            scheduler,
            config.transcript_interval(),
            config.transcript_prefix.clone(),
        );

        let handle = ClientHandle {
            commands: command_tx,
            state: state.clone(),
            transport,
        };
        let client = Self {
            state,
            transport_events,
            peer_events,
            ticks,
            history: history_rx,
            commands,
            registration,
            calls,
            relay,
        };
        (client, handle)
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// Run until shut down or every handle is dropped.
    ///
    /// Sources are polled in a fixed order, so anything the transport
    /// delivered before a command was issued is handled first.
    pub async fn run(mut self) {
        info!("Client event loop started");
        loop {
            tokio::select! {
                biased;

                Some(event) = self.transport_events.recv() => self.on_transport(event).await,
                Some(event) = self.peer_events.recv() => self.calls.on_peer_event(event).await,
                Some(batch) = self.history.recv() => self.relay.on_history(batch),
                Some(tick) = self.ticks.recv() => self.on_tick(tick).await,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
            }
        }

        self.relay.disable_transcript();
        self.calls.hang_up().await;
        info!("Client event loop stopped");
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if let Err(e) = self.registration.on_connected() {
                    warn!("Registration not sent: {e}");
                }
                if let Err(e) = self.relay.rejoin() {
                    warn!("Room rejoin failed: {e}");
                }
            }
            TransportEvent::Disconnected { reason } => {
                warn!(%reason, "Signaling disconnected");
                self.calls.on_transport_lost().await;
                self.relay.on_transport_lost();
                self.registration.on_disconnected();
            }
            TransportEvent::Signal(signal) => self.on_signal(signal).await,
        }
    }

    async fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::ConnectionAssigned(id) => self.registration.on_connection_assigned(id),
            Signal::UserJoined(update) | Signal::UserLeft(update) => {
                if self.registration.on_roster(update) {
                    self.calls.prepare_media().await;
                }
            }
            Signal::Offer(payload) => self.calls.on_offer(payload),
            Signal::Answer(payload) => self.calls.on_answer(payload).await,
            Signal::IceCandidate(payload) => self.calls.on_remote_candidate(payload).await,
            Signal::CallDeclined(route) => self.calls.on_call_declined(route).await,
            Signal::EndCall(route) => self.calls.on_end_call(route).await,
            Signal::ReceiveMessage(message) => self.relay.on_message(message),
            other @ (Signal::RegisterUser(_)
            | Signal::JoinAppointment(_)
            | Signal::SendMessage(_)) => {
                debug!(event = other.kind().as_str(), "Ignoring server-bound signal");
            }
        }
    }

    async fn on_tick(&mut self, tick: Tick) {
        let handled = match tick.kind {
            TimerKind::RegistrationDeadline => self.registration.on_tick(&tick),
            TimerKind::CallCountdown => self.calls.on_tick(&tick).await,
            TimerKind::TranscriptFlush => self.relay.on_tick(&tick),
        };
        if !handled {
            debug!(kind = ?tick.kind, "Dropping stale tick");
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Register(identity, reply) => {
                let _ = reply.send(self.registration.register(identity));
            }
            Command::StartCall {
                target,
                display_name,
                reply,
            } => {
                let _ = reply.send(self.calls.start_call(target, &display_name).await);
            }
            Command::Accept(reply) => {
                let _ = reply.send(self.calls.accept().await);
            }
            Command::Decline(reply) => {
                let _ = reply.send(self.calls.decline().await);
            }
            Command::HangUp(reply) => {
                self.calls.hang_up().await;
                let _ = reply.send(());
            }
            Command::ToggleAudio(reply) => {
                let _ = reply.send(self.calls.toggle_audio());
            }
            Command::ToggleVideo(reply) => {
                let _ = reply.send(self.calls.toggle_video());
            }
            Command::JoinRoom(room_id, reply) => {
                let _ = reply.send(self.relay.join_room(&room_id));
            }
            Command::SendMessage(content, reply) => {
                let _ = reply.send(self.relay.send_message(&content));
            }
            Command::EnableTranscript(reply) => {
                let _ = reply.send(self.relay.enable_transcript());
            }
            Command::PushTranscript(text) => self.relay.push_transcript(&text),
            Command::DisableTranscript => self.relay.disable_transcript(),
            // Handled by the loop itself.
            Command::Shutdown => {}
        }
    }
}

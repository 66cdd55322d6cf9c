//! # telecall-signal
//!
//! Reference signaling server for Telecall clients. Handles:
//! - Connection ids and the roster of registered users
//! - Relaying offers, answers, candidates and hang-ups between peers
//! - Appointment rooms with chat history (`GET /api/appointments/{room}/messages`)
//!
//! State is in memory only; a restart forgets every room.

pub mod error;
pub mod registry;
pub mod rooms;
pub mod routes;
pub mod validation;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use telecall_common::Signal;
use telecall_common::config::LimitsConfig;
use telecall_common::models::ConnectionId;
use tokio::sync::mpsc;

pub use error::{SignalError, SignalResult};
use registry::PeerRegistry;
use rooms::Rooms;

/// Shared server state.
pub struct SignalState {
    pub peers: PeerRegistry,
    pub rooms: Rooms,
    pub limits: LimitsConfig,
    started: Instant,
}

impl SignalState {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            peers: PeerRegistry::new(),
            rooms: Rooms::new(limits.max_history),
            limits,
            started: Instant::now(),
        }
    }
}

/// Build the signaling router: the `/signal` socket plus the REST routes.
pub fn build_router(state: SignalState) -> Router {
    Router::new()
        .route("/signal", get(ws_handler))
        .merge(routes::router())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<SignalState>>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Handle a single signaling socket.
async fn handle_connection(socket: WebSocket, state: Arc<SignalState>) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = ConnectionId::generate();

    // Everything addressed to this socket, from any connection, lands here
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Signal>();
    state.peers.connect(connection_id.clone(), outbound_tx).await;
    if state
        .peers
        .send_to(&connection_id, Signal::ConnectionAssigned(connection_id.clone()))
        .await
        .is_err()
    {
        return;
    }

    // ── Sender task ──────────────────────────────────────────────────────────
    let send_task = tokio::spawn(async move {
        while let Some(signal) = outbound_rx.recv().await {
            let text = match signal.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unencodable signal");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tracing::info!(connection = %connection_id, "Signaling socket opened");

    // ── Receive loop ─────────────────────────────────────────────────────────
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let outcome = match Signal::decode(text.as_str()) {
                    Ok(signal) => dispatch(&state, &connection_id, signal).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = outcome {
                    tracing::warn!(
                        connection = %connection_id,
                        code = e.error_code(),
                        "Signal dropped: {e}"
                    );
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────
    state.rooms.leave_all(&connection_id).await;
    if let Some(update) = state.peers.remove(&connection_id).await {
        tracing::debug!(
            connection = %connection_id,
            remaining = update.users.len(),
            "User left"
        );
    }

    send_task.abort();
    tracing::info!(connection = %connection_id, "Signaling socket closed");
}

/// Act on one signal from `from`.
async fn dispatch(state: &SignalState, from: &ConnectionId, signal: Signal) -> SignalResult<()> {
    match signal {
        Signal::RegisterUser(registration) => {
            let update = state.peers.register(from, registration).await?;
            tracing::info!(
                connection = %from,
                username = update.username.as_deref().unwrap_or_default(),
                online = update.users.len(),
                "User registered"
            );
        }

        Signal::JoinAppointment(room_id) => {
            validation::validate_room_id(&room_id)?;
            if state.rooms.join(&room_id, from).await {
                tracing::debug!(connection = %from, room = %room_id, "Joined room");
            }
        }

        Signal::SendMessage(msg) => {
            validation::validate_message(&msg, state.limits.max_message_length)?;
            let (stored, members) = state.rooms.post(msg).await;
            tracing::debug!(
                room = %stored.room_id,
                message = %stored.id,
                recipients = members.len(),
                "Room message stored"
            );
            state
                .peers
                .send_to_all(&members, &Signal::ReceiveMessage(stored))
                .await;
        }

        mut directed if directed.recipient().is_some() => {
            // Never trust the client's idea of who it is
            directed.set_sender(from.clone());
            let Some(to) = directed.recipient().cloned() else {
                return Ok(());
            };
            let kind = directed.kind();
            state.peers.send_to(&to, directed).await?;
            tracing::debug!(from = %from, to = %to, kind = kind.as_str(), "Relayed");
        }

        other => return Err(SignalError::Unexpected(other.kind())),
    }
    Ok(())
}

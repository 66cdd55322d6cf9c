//! REST surface: room history and health.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use telecall_common::models::RoomMessage;

use crate::SignalState;
use crate::error::SignalResult;
use crate::validation::validate_room_id;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    connections: usize,
    registered: usize,
    rooms: usize,
}

pub fn router() -> Router<Arc<SignalState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/appointments/{room_id}/messages", get(room_history))
}

async fn health_check(State(state): State<Arc<SignalState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        connections: state.peers.active_count().await,
        registered: state.peers.registered_count().await,
        rooms: state.rooms.count().await,
    })
}

/// Room history oldest first; `[]` for rooms nobody has written to.
async fn room_history(
    State(state): State<Arc<SignalState>>,
    Path(room_id): Path<String>,
) -> SignalResult<Json<Vec<RoomMessage>>> {
    validate_room_id(&room_id)?;
    Ok(Json(state.rooms.history(&room_id).await))
}

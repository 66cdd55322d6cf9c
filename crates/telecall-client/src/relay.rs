//! Side-channel relay: room chat and speech transcripts over the signaling socket.
//!
//! Independent of call state. Messages only enter local state when the
//! server echoes them (`receive-message`) or history returns them, so every
//! member of a room sees the same order.

use std::sync::Arc;
use std::time::Duration;

use telecall_common::models::{OutgoingMessage, RoomMessage};
use telecall_common::{CallError, CallResult, Signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::rest::HistorySource;
use crate::scheduler::{ScheduledTask, Scheduler, Tick, TimerKind};
use crate::state::{ClientEvent, ClientState};
use crate::transport::SignalingTransport;

/// Name used when no identity was configured.
const GUEST_NAME: &str = "Guest";

/// Result of one history fetch, handed back to the client loop.
pub struct HistoryBatch {
    pub room_id: String,
    pub result: Result<Vec<RoomMessage>>,
}

struct Transcript {
    task: ScheduledTask,
    buffer: String,
}

pub struct SideChannelRelay {
    state: ClientState,
    transport: SignalingTransport,
    history: Arc<dyn HistorySource>,
    history_tx: mpsc::UnboundedSender<HistoryBatch>,
    scheduler: Scheduler,
    flush_every: Duration,
    prefix: String,
    room: Option<String>,
    transcript: Option<Transcript>,
}

impl SideChannelRelay {
    pub fn new(
        state: ClientState,
        transport: SignalingTransport,
        history: Arc<dyn HistorySource>,
        history_tx: mpsc::UnboundedSender<HistoryBatch>,
        scheduler: Scheduler,
        flush_every: Duration,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            state,
            transport,
            history,
            history_tx,
            scheduler,
            flush_every,
            prefix: prefix.into(),
            room: None,
            transcript: None,
        }
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Subscribe to `room_id` and load its history.
    ///
    /// The room is remembered even if the send fails, so it is joined again
    /// after the next reconnect.
    pub fn join_room(&mut self, room_id: &str) -> CallResult<()> {
        if self.room.as_deref() != Some(room_id) {
            self.disable_transcript();
            self.room = Some(room_id.to_owned());
            self.state.update_chat(|chat| {
                chat.room_id = Some(room_id.to_owned());
                chat.messages.clear();
            });
        }
        info!(room = room_id, "Joining room");
        self.transport
            .send(Signal::JoinAppointment(room_id.to_owned()))?;
        self.fetch_history(room_id);
        Ok(())
    }

    /// Re-send the join after a reconnect; the server forgot the old socket.
    pub fn rejoin(&mut self) -> CallResult<()> {
        match self.room.clone() {
            Some(room) => self.join_room(&room),
            None => Ok(()),
        }
    }

    fn fetch_history(&self, room_id: &str) {
        let history = Arc::clone(&self.history);
        let tx = self.history_tx.clone();
        let room_id = room_id.to_owned();
        tokio::spawn(async move {
            let result = history.fetch_history(&room_id).await;
            let _ = tx.send(HistoryBatch { room_id, result });
        });
    }

    /// Merge a finished history fetch.
    pub fn on_history(&mut self, batch: HistoryBatch) {
        if self.room.as_deref() != Some(batch.room_id.as_str()) {
            debug!(room = %batch.room_id, "Dropping history for a room we left");
            return;
        }
        match batch.result {
            Ok(messages) => {
                let mut added = 0;
                self.state.update_chat(|chat| added = chat.merge(messages));
                debug!(room = %batch.room_id, added, "History merged");
            }
            Err(e) => {
                warn!(room = %batch.room_id, "History fetch failed: {e}");
                self.state.emit(ClientEvent::HistoryUnavailable {
                    room_id: batch.room_id,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Live `receive-message` from the server.
    pub fn on_message(&mut self, message: RoomMessage) {
        if self.room.as_deref() != Some(message.room_id.as_str()) {
            return;
        }
        let mut added = 0;
        let incoming = message.clone();
        self.state.update_chat(|chat| added = chat.merge([incoming]));
        if added > 0 {
            self.state.emit(ClientEvent::MessageReceived(message));
        }
    }

    /// Send a chat line to the current room. Blank lines are ignored.
    pub fn send_message(&self, content: &str) -> CallResult<()> {
        let room_id = self.room.clone().ok_or(CallError::NotInRoom)?;
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }

        let identity = self.state.connection().identity;
        let (sender_user_id, sender_display_name) = match identity {
            Some(id) => (id.user_id, id.display_name),
            None => (None, GUEST_NAME.to_owned()),
        };
        self.transport.send(Signal::SendMessage(OutgoingMessage {
            room_id,
            sender_user_id,
            sender_display_name,
            content: content.to_owned(),
        }))
    }

    // ── Transcript ──

    pub fn enable_transcript(&mut self) -> CallResult<()> {
        if self.room.is_none() {
            return Err(CallError::NotInRoom);
        }
        if self.transcript.is_some() {
            return Ok(());
        }
        self.transcript = Some(Transcript {
            task: self.scheduler.every(TimerKind::TranscriptFlush, self.flush_every),
            buffer: String::new(),
        });
        self.state.update_chat(|chat| chat.transcript_enabled = true);
        info!(every = ?self.flush_every, "Transcript relay enabled");
        Ok(())
    }

    /// Add recognised speech to the pending buffer.
    pub fn push_transcript(&mut self, text: &str) {
        let text = text.trim();
        let Some(transcript) = self.transcript.as_mut() else {
            debug!("Transcript disabled; dropping recognised text");
            return;
        };
        if text.is_empty() {
            return;
        }
        if !transcript.buffer.is_empty() {
            transcript.buffer.push(' ');
        }
        transcript.buffer.push_str(text);
    }

    /// Stop flushing. Unsent text is discarded; sent lines stay.
    pub fn disable_transcript(&mut self) {
        let Some(transcript) = self.transcript.take() else {
            return;
        };
        transcript.task.stop();
        self.state.update_chat(|chat| chat.transcript_enabled = false);
        info!(discarded = transcript.buffer.len(), "Transcript relay disabled");
    }

    /// Returns `true` if the tick belonged to the transcript timer.
    pub fn on_tick(&mut self, tick: &Tick) -> bool {
        let Some(transcript) = self.transcript.as_mut() else {
            return false;
        };
        if !transcript.task.owns(tick) {
            return false;
        }
        if transcript.buffer.is_empty() {
            return true;
        }

        let line = format!("{} {}", self.prefix, transcript.buffer);
        transcript.buffer.clear();
        if let Err(e) = self.send_message(&line) {
            warn!(code = e.reason_code(), "Transcript flush failed: {e}");
        }
        true
    }

    pub fn on_transport_lost(&mut self) {
        self.disable_transcript();
    }
}

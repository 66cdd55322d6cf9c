//! Room message model: chat and transcript lines scoped to an appointment.
//!
//! Ids are UUID v7 assigned by the signaling server when it receives the
//! message, so sorting by id yields server-receipt order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message as stored and echoed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub id: Uuid,

    #[serde(rename = "roomId", alias = "room_id")]
    pub room_id: String,

    #[serde(
        rename = "senderUserIdentity",
        alias = "sender_user_id",
        alias = "senderId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_user_id: Option<String>,

    #[serde(rename = "senderDisplayName", alias = "sender_display_name", alias = "senderName")]
    pub sender_display_name: String,

    pub content: String,

    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl RoomMessage {
    /// Whether this line came from the speech-transcript relay.
    pub fn is_transcript(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.content.starts_with(prefix)
    }
}

/// Client → server chat payload; the server assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(rename = "roomId", alias = "room_id")]
    pub room_id: String,

    #[serde(
        rename = "senderUserIdentity",
        alias = "sender_user_id",
        alias = "senderId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_user_id: Option<String>,

    #[serde(rename = "senderDisplayName", alias = "sender_display_name", alias = "senderName")]
    pub sender_display_name: String,

    pub content: String,
}

impl OutgoingMessage {
    /// Stamp the message as received now under `id`.
    pub fn into_room_message(self, id: Uuid, created_at: DateTime<Utc>) -> RoomMessage {
        RoomMessage {
            id,
            room_id: self.room_id,
            sender_user_id: self.sender_user_id,
            sender_display_name: self.sender_display_name,
            content: self.content,
            created_at,
        }
    }
}

//! Canonical signal schema and its wire codec.
//!
//! Every message on the signaling socket is one JSON frame:
//!
//! ```json
//! {"event": "offer", "data": {"to": "...", "from": "...", "offer": {...}, "username": "Alice"}}
//! ```
//!
//! The wire uses camelCase keys (`userId`, `roomId`, `sdpMLineIndex`); older
//! peers send snake_case. Both are accepted here, and only here: everything
//! past [`Signal::decode`] sees the Rust field names.

use serde::{Deserialize, Serialize};

use crate::error::CallError;
use crate::models::{
    ConnectionId, IceCandidate, OutgoingMessage, PeerRosterEntry, RoomMessage, SessionDescription,
    UserIdentity,
};

/// Every signal exchanged between clients and the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Signal {
    /// Server → Client: your address for this socket
    #[serde(rename = "socket-id")]
    ConnectionAssigned(ConnectionId),

    /// Client → Server: announce who is behind this socket
    RegisterUser(UserRegistration),

    /// Server → All: someone registered; full roster attached
    UserJoined(RosterUpdate),

    /// Server → All: someone disconnected; full roster attached
    UserLeft(RosterUpdate),

    /// Client → Client: call invitation carrying the caller's description
    Offer(OfferPayload),

    /// Client → Client: callee's description
    Answer(AnswerPayload),

    /// Client → Client: trickled network path
    IceCandidate(CandidatePayload),

    /// Client → Client: callee refused the offer
    CallDeclined(Route),

    /// Client → Client: either side hung up
    EndCall(Route),

    /// Client → Server: subscribe this socket to a room
    JoinAppointment(String),

    /// Client → Server: chat line for a room
    SendMessage(OutgoingMessage),

    /// Server → Room: stored chat line echoed to every member
    ReceiveMessage(RoomMessage),
}

/// Discriminant of [`Signal`], used to key handler registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    ConnectionAssigned,
    RegisterUser,
    UserJoined,
    UserLeft,
    Offer,
    Answer,
    IceCandidate,
    CallDeclined,
    EndCall,
    JoinAppointment,
    SendMessage,
    ReceiveMessage,
}

impl SignalKind {
    /// Wire event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionAssigned => "socket-id",
            Self::RegisterUser => "register-user",
            Self::UserJoined => "user-joined",
            Self::UserLeft => "user-left",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::CallDeclined => "call-declined",
            Self::EndCall => "end-call",
            Self::JoinAppointment => "join-appointment",
            Self::SendMessage => "send-message",
            Self::ReceiveMessage => "receive-message",
        }
    }
}

/// `{to, from}` addressing shared by all peer-to-peer signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub to: ConnectionId,
    pub from: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferPayload {
    pub to: ConnectionId,
    pub from: ConnectionId,
    pub offer: SessionDescription,
    /// Caller's display name for the ringing prompt
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub to: ConnectionId,
    pub from: ConnectionId,
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub to: ConnectionId,
    pub from: ConnectionId,
    pub candidate: IceCandidate,
}

/// Roster broadcast: who changed, plus the complete roster afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterUpdate {
    /// Connection that joined or left
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub users: Vec<PeerRosterEntry>,
}

/// `register-user` payload. Accepts `{username, userId?}` or a bare username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RegistrationWire")]
pub struct UserRegistration {
    pub username: String,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistrationWire {
    Bare(String),
    Full {
        username: String,
        #[serde(default, alias = "user_id")]
        #[serde(rename = "userId")]
        user_id: Option<String>,
    },
}

impl From<RegistrationWire> for UserRegistration {
    fn from(wire: RegistrationWire) -> Self {
        match wire {
            RegistrationWire::Bare(username) => Self {
                username,
                user_id: None,
            },
            RegistrationWire::Full { username, user_id } => Self { username, user_id },
        }
    }
}

impl From<&UserIdentity> for UserRegistration {
    fn from(identity: &UserIdentity) -> Self {
        Self {
            username: identity.display_name.clone(),
            user_id: identity.user_id.clone(),
        }
    }
}

impl Signal {
    /// Parse one wire frame.
    pub fn decode(text: &str) -> Result<Self, CallError> {
        serde_json::from_str(text)
            .map_err(|e| CallError::Protocol(format!("Invalid signaling frame: {e}")))
    }

    /// Serialize to one wire frame.
    pub fn encode(&self) -> Result<String, CallError> {
        serde_json::to_string(self)
            .map_err(|e| CallError::Protocol(format!("Failed to encode signal: {e}")))
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            Self::ConnectionAssigned(_) => SignalKind::ConnectionAssigned,
            Self::RegisterUser(_) => SignalKind::RegisterUser,
            Self::UserJoined(_) => SignalKind::UserJoined,
            Self::UserLeft(_) => SignalKind::UserLeft,
            Self::Offer(_) => SignalKind::Offer,
            Self::Answer(_) => SignalKind::Answer,
            Self::IceCandidate(_) => SignalKind::IceCandidate,
            Self::CallDeclined(_) => SignalKind::CallDeclined,
            Self::EndCall(_) => SignalKind::EndCall,
            Self::JoinAppointment(_) => SignalKind::JoinAppointment,
            Self::SendMessage(_) => SignalKind::SendMessage,
            Self::ReceiveMessage(_) => SignalKind::ReceiveMessage,
        }
    }

    /// Recipient of a peer-to-peer signal; `None` for roster/room traffic.
    pub fn recipient(&self) -> Option<&ConnectionId> {
        match self {
            Self::Offer(p) => Some(&p.to),
            Self::Answer(p) => Some(&p.to),
            Self::IceCandidate(p) => Some(&p.to),
            Self::CallDeclined(r) | Self::EndCall(r) => Some(&r.to),
            _ => None,
        }
    }

    /// Sender of a peer-to-peer signal; `None` for roster/room traffic.
    pub fn sender(&self) -> Option<&ConnectionId> {
        match self {
            Self::Offer(p) => Some(&p.from),
            Self::Answer(p) => Some(&p.from),
            Self::IceCandidate(p) => Some(&p.from),
            Self::CallDeclined(r) | Self::EndCall(r) => Some(&r.from),
            _ => None,
        }
    }

    /// Overwrite the sender of a peer-to-peer signal. No-op for other kinds.
    pub fn set_sender(&mut self, from: ConnectionId) {
        match self {
            Self::Offer(p) => p.from = from,
            Self::Answer(p) => p.from = from,
            Self::IceCandidate(p) => p.from = from,
            Self::CallDeclined(r) | Self::EndCall(r) => r.from = from,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_accepts_bare_string_and_object() {
        let bare = Signal::decode(r#"{"event":"register-user","data":"Alice"}"#).unwrap();
        assert_eq!(
            bare,
            Signal::RegisterUser(UserRegistration {
                username: "Alice".into(),
                user_id: None
            })
        );

        let camel =
            Signal::decode(r#"{"event":"register-user","data":{"username":"Alice","userId":"u1"}}"#)
                .unwrap();
        let snake =
            Signal::decode(r#"{"event":"register-user","data":{"username":"Alice","user_id":"u1"}}"#)
                .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.kind(), SignalKind::RegisterUser);
    }

    #[test]
    fn register_encodes_camel_case() {
        let signal = Signal::RegisterUser(UserRegistration::from(&UserIdentity::account(
            "u1", "Alice",
        )));
        let value: serde_json::Value = serde_json::from_str(&signal.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "register-user", "data": {"username": "Alice", "userId": "u1"}})
        );
    }

    #[test]
    fn roster_broadcast_decodes() {
        let frame = json!({
            "event": "user-joined",
            "data": {
                "userId": "c2",
                "username": "Bob",
                "users": [
                    {"id": "c1", "userId": "u1", "username": "Alice"},
                    {"id": "c2", "username": "Bob"}
                ]
            }
        });
        let Signal::UserJoined(update) = Signal::decode(&frame.to_string()).unwrap() else {
            panic!("expected user-joined");
        };
        assert_eq!(update.user_id, ConnectionId::from("c2"));
        assert_eq!(update.users.len(), 2);
        assert_eq!(update.users[1].user_id, None);
    }

    #[test]
    fn socket_id_and_room_join_are_bare_strings() {
        let assigned = Signal::ConnectionAssigned("c9".into());
        assert_eq!(assigned.encode().unwrap(), r#"{"event":"socket-id","data":"c9"}"#);

        let join = Signal::decode(r#"{"event":"join-appointment","data":"appt-7"}"#).unwrap();
        assert_eq!(join, Signal::JoinAppointment("appt-7".into()));
    }

    #[test]
    fn candidate_signal_translates_field_names() {
        let frame = json!({
            "event": "ice-candidate",
            "data": {
                "to": "c2",
                "from": "c1",
                "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
            }
        });
        let signal = Signal::decode(&frame.to_string()).unwrap();
        assert_eq!(signal.recipient(), Some(&ConnectionId::from("c2")));
        assert_eq!(signal.sender(), Some(&ConnectionId::from("c1")));

        let back: serde_json::Value = serde_json::from_str(&signal.encode().unwrap()).unwrap();
        assert_eq!(back["data"]["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn chat_payloads_accept_either_casing() {
        let camel = json!({
            "event": "send-message",
            "data": {"roomId": "r1", "senderUserIdentity": "u1", "senderDisplayName": "Alice", "content": "hi"}
        });
        let snake = json!({
            "event": "send-message",
            "data": {"room_id": "r1", "sender_user_id": "u1", "sender_display_name": "Alice", "content": "hi"}
        });
        assert_eq!(
            Signal::decode(&camel.to_string()).unwrap(),
            Signal::decode(&snake.to_string()).unwrap()
        );
    }

    #[test]
    fn set_sender_overwrites_route() {
        let mut signal = Signal::EndCall(Route {
            to: "c2".into(),
            from: "spoofed".into(),
        });
        signal.set_sender("c1".into());
        assert_eq!(signal.sender(), Some(&ConnectionId::from("c1")));

        let mut join = Signal::JoinAppointment("r".into());
        join.set_sender("c1".into());
        assert_eq!(join.sender(), None);
    }

    #[test]
    fn unknown_event_is_a_protocol_error() {
        let err = Signal::decode(r#"{"event":"teleport","data":{}}"#).unwrap_err();
        assert_eq!(err.reason_code(), "PROTOCOL_ERROR");
    }
}

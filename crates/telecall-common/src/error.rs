//! Call-level error taxonomy shared by client and server.
//!
//! Every variant carries a stable [`CallError::reason_code`] so the UI can
//! show why a call ended without parsing display strings.

use crate::models::ConnectionId;

/// Conditions surfaced by the signaling and call-orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    // === Transport ===
    #[error("Signaling transport disconnected")]
    TransportDisconnected,

    #[error("Connection {connection_id} is no longer valid")]
    AddressStale { connection_id: ConnectionId },

    #[error("Registration not acknowledged within {after_secs}s")]
    RegistrationTimedOut { after_secs: u64 },

    // === Negotiation ===
    #[error("Offer rejected: {0}")]
    OfferRejected(String),

    #[error("Answer rejected: {0}")]
    AnswerRejected(String),

    #[error("ICE candidate could not be applied: {0}")]
    IceApplyFailed(String),

    #[error("Camera/microphone access denied: {0}")]
    MediaAccessDenied(String),

    // === Lifecycle ===
    #[error("Call declined by {from}")]
    RemoteDeclined { from: ConnectionId },

    #[error("Call reached its time limit")]
    CallTimedOut,

    #[error("Remote party ended the call")]
    RemoteEnded,

    #[error("Call ended locally")]
    HungUp,

    #[error("No incoming call is pending")]
    NoIncomingCall,

    #[error("Not joined to a room")]
    NotInRoom,

    // === Wire ===
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl CallError {
    /// Error code string for programmatic handling by the UI.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::TransportDisconnected => "TRANSPORT_DISCONNECTED",
            Self::AddressStale { .. } => "ADDRESS_STALE",
            Self::RegistrationTimedOut { .. } => "REGISTRATION_TIMED_OUT",
            Self::OfferRejected(_) => "OFFER_REJECTED",
            Self::AnswerRejected(_) => "ANSWER_REJECTED",
            Self::IceApplyFailed(_) => "ICE_APPLY_FAILED",
            Self::MediaAccessDenied(_) => "MEDIA_ACCESS_DENIED",
            Self::RemoteDeclined { .. } => "REMOTE_DECLINED",
            Self::CallTimedOut => "CALL_TIMED_OUT",
            Self::RemoteEnded => "REMOTE_ENDED",
            Self::HungUp => "HUNG_UP",
            Self::NoIncomingCall => "NO_INCOMING_CALL",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::Protocol(_) => "PROTOCOL_ERROR",
        }
    }

    /// ICE apply failures are skipped; everything else ends what it touches.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::IceApplyFailed(_))
    }
}

/// Convenience alias for results carrying a [`CallError`].
pub type CallResult<T> = Result<T, CallError>;

//! Server-side error type.
//!
//! Socket handlers only log these; the REST routes turn them into JSON
//! error bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use telecall_common::models::ConnectionId;
use telecall_common::{CallError, SignalKind};

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("No connection {connection_id}")]
    UnknownPeer { connection_id: ConnectionId },

    #[error("Connection {connection_id} is not open")]
    NotConnected { connection_id: ConnectionId },

    #[error("Clients may not send '{}'", .0.as_str())]
    Unexpected(SignalKind),

    #[error(transparent)]
    Protocol(#[from] CallError),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl SignalError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::Unexpected(_) | Self::Protocol(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownPeer { .. } | Self::NotConnected { .. } => StatusCode::NOT_FOUND,
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::UnknownPeer { .. } => "UNKNOWN_PEER",
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::Unexpected(_) => "UNEXPECTED_SIGNAL",
            Self::Protocol(e) => e.reason_code(),
        }
    }
}

impl IntoResponse for SignalError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code().to_string(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type SignalResult<T> = Result<T, SignalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = SignalError::Validation { message: "Content cannot be empty".into() };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn protocol_errors_keep_their_reason_code() {
        let err = SignalError::from(CallError::Protocol("bad frame".into()));
        assert_eq!(err.error_code(), "PROTOCOL_ERROR");
        assert_eq!(
            SignalError::Unexpected(SignalKind::UserJoined).to_string(),
            "Clients may not send 'user-joined'"
        );
    }
}

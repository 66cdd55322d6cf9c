//! Error types for the Telecall client.

use telecall_common::CallError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A call/signaling condition from the shared taxonomy.
    #[error(transparent)]
    Call(#[from] CallError),

    /// The history endpoint answered with a non-2xx status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// An error from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An error from the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The client event loop has stopped.
    #[error("Client is shut down")]
    Closed,

    /// A malformed URL in configuration.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

//! # telecall-client
//!
//! Signaling client and call orchestration for Telecall.
//!
//! One [`Client`] owns a signaling transport, the registry mirror, the call
//! controller and the chat/transcript relay, and runs them all on a single
//! event loop. The UI drives it through a [`ClientHandle`] and renders from
//! the [`ClientState`] snapshot.
//!
//! Media capture and the peer connection itself are supplied by the embedder
//! through [`media::MediaEngine`].

pub mod call;
pub mod client;
pub mod error;
pub mod media;
pub mod negotiator;
pub mod registry;
pub mod relay;
pub mod rest;
pub mod scheduler;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientHandle, Collaborators};
pub use error::{ClientError, Result};
pub use rest::{HistoryClient, HistorySource};
pub use state::{CallStatus, ClientEvent, ClientSnapshot, ClientState, RegistrationStatus};
pub use transport::{EventKind, SignalingTransport, TransportEvent};

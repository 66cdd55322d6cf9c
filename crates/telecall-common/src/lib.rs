//! # telecall-common
//!
//! Shared identities, the canonical signal schema and its wire codec,
//! configuration and the error taxonomy used by every Telecall crate.
//! No I/O lives here, only primitives and contracts.

pub mod config;
pub mod error;
pub mod models;
pub mod signal;
pub mod snowflake;

pub use error::{CallError, CallResult};
pub use signal::{Signal, SignalKind};

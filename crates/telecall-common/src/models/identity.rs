//! Identity model: who sits behind a signaling address.
//!
//! Two kinds of identity exist side by side:
//! - [`ConnectionId`]: handed out by the signaling server per socket, dies with it
//! - [`UserIdentity`]: supplied by the application at registration, optional for guests

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Ephemeral per-socket address used in every `to`/`from` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id, as assigned by the signaling server on socket open.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable application-level identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Account id from the REST backend; `None` for guests
    pub user_id: Option<String>,
    pub display_name: String,
}

impl UserIdentity {
    pub fn account(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            display_name: display_name.into(),
        }
    }

    pub fn guest(display_name: impl Into<String>) -> Self {
        Self {
            user_id: None,
            display_name: display_name.into(),
        }
    }
}

/// One connected peer as carried in roster broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRosterEntry {
    pub id: ConnectionId,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub username: String,
}

/// Full roster snapshot keyed by connection id.
///
/// Only ever replaced wholesale from a broadcast, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Roster {
    entries: BTreeMap<ConnectionId, PeerRosterEntry>,
}

impl Roster {
    pub fn from_snapshot(users: Vec<PeerRosterEntry>) -> Self {
        let entries = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self { entries }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Find the connection currently held by an account.
    pub fn find_user(&self, user_id: &str) -> Option<&PeerRosterEntry> {
        self.entries
            .values()
            .find(|e| e.user_id.as_deref() == Some(user_id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PeerRosterEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

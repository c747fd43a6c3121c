//! Core domain types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identity assigned to this host by the relay router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(pub u64);

impl HostId {
    /// Create a new host ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity by which the router recognizes this host instance.
///
/// Assigned at most once per router-client lifetime. When the router
/// rotates the key, the orchestrator persists it before forwarding the
/// identity to the session registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    /// Numeric id assigned by the router
    pub host_id: HostId,
    /// Secret key material recognized by the router
    pub host_key: Bytes,
}

/// Connection parameters for the relay router.
///
/// Equality is by value across all four fields; any difference forces a
/// full reconnect rather than a partial update, because partial mutation
/// of an active relay session is unsafe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterParameters {
    /// Router host name or address
    pub address: String,
    /// Router control port
    pub port: u16,
    /// Router public key used during the relay handshake
    pub public_key: Bytes,
    /// This host's key, if one was previously assigned
    pub host_key: Bytes,
}

/// Observable state of the router connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterState {
    /// Routing is disabled in configuration
    Disabled,
    /// Connection attempt in progress
    Connecting,
    /// Control connection established and host registered
    Connected,
    /// Connection failed; the client retries with its own policy
    Error,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterState::Disabled => write!(f, "disabled"),
            RouterState::Connecting => write!(f, "connecting"),
            RouterState::Connected => write!(f, "connected"),
            RouterState::Error => write!(f, "error"),
        }
    }
}

/// Kind of session a client requested during authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    /// Full remote control of the desktop
    DesktopManage,
    /// View-only desktop access
    DesktopView,
    /// File transfer only
    FileTransfer,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::DesktopManage => write!(f, "desktop-manage"),
            SessionType::DesktopView => write!(f, "desktop-view"),
            SessionType::FileTransfer => write!(f, "file-transfer"),
        }
    }
}

/// Where a user record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserProvenance {
    /// From configuration; survives restarts
    Persistent,
    /// Created for a single granted session; owned by the registry
    Ephemeral,
}

/// A credential accepted by the authentication handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Login name
    pub name: String,
    /// Shared secret material
    pub secret: Bytes,
    /// Persistent or ephemeral origin
    pub provenance: UserProvenance,
}

impl UserRecord {
    /// Create a persistent user record
    pub fn persistent(name: impl Into<String>, secret: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            provenance: UserProvenance::Persistent,
        }
    }

    /// Create an ephemeral (session-scoped) user record
    pub fn ephemeral(name: impl Into<String>, secret: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            provenance: UserProvenance::Ephemeral,
        }
    }
}

/// The user list consumed by the authentication handshake.
///
/// Built by merging the persistent list from configuration with the
/// ephemeral list owned by the session registry. On a name collision the
/// ephemeral record wins: it was granted most recently and deliberately,
/// so shadowing the stored credential is the least surprising outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserList {
    users: Vec<UserRecord>,
}

impl UserList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from persistent records
    pub fn from_persistent(users: Vec<UserRecord>) -> Self {
        Self { users }
    }

    /// Merge another list into this one.
    ///
    /// Records from `other` replace same-named records already present.
    pub fn merge(&mut self, other: &UserList) {
        for record in &other.users {
            if let Some(existing) = self.users.iter_mut().find(|u| u.name == record.name) {
                *existing = record.clone();
            } else {
                self.users.push(record.clone());
            }
        }
    }

    /// Add a single record, replacing any same-named one
    pub fn insert(&mut self, record: UserRecord) {
        if let Some(existing) = self.users.iter_mut().find(|u| u.name == record.name) {
            *existing = record;
        } else {
            self.users.push(record);
        }
    }

    /// Remove a record by name
    pub fn remove(&mut self, name: &str) -> Option<UserRecord> {
        let idx = self.users.iter().position(|u| u.name == name)?;
        Some(self.users.remove(idx))
    }

    /// Look up a record by name
    pub fn find(&self, name: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Iterate over all records
    pub fn iter(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.iter()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

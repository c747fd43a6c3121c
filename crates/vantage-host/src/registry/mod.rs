//! Session registry
//!
//! Owns every live authenticated session, the ephemeral user list, and
//! the observability notifications pushed down from the orchestrator
//! (router state, host identity, OS session events). The registry is
//! confined to the control task; external callers reach it through the
//! `DispatchProxy` handed out by the orchestrator.

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use vantage_core::types::{HostId, RouterState, SessionType, UserList, UserRecord};

use crate::admission::IngressChannel;
use crate::auth::SessionDescriptor;

/// Status change of an OS-level session (console sign-in and the like)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsSessionEvent {
    /// A user signed in
    SignIn,
    /// A user signed out
    SignOut,
    /// The console was locked
    Lock,
    /// The console was unlocked
    Unlock,
}

/// A live, authenticated session.
///
/// Created from a [`SessionDescriptor`] exactly once; destroyed on
/// disconnect or registry teardown. The per-feature implementations
/// (remote control, file transfer) attach to the owned channel.
#[derive(Debug)]
pub struct LiveSession {
    id: Uuid,
    session_type: SessionType,
    version: String,
    user_name: String,
    channel: IngressChannel,
}

impl LiveSession {
    fn from_descriptor(descriptor: SessionDescriptor) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_type: descriptor.session_type,
            version: descriptor.version,
            user_name: descriptor.user_name,
            channel: descriptor.channel,
        }
    }

    /// Unique id of this session
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Kind of session granted during authentication
    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    /// Handshake version the client spoke
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Authenticated user
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// The owned channel
    pub fn channel(&mut self) -> &mut IngressChannel {
        &mut self.channel
    }
}

/// Registry of live sessions and session-scoped state
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, LiveSession>,
    ephemeral_users: UserList,
    router_state: RouterState,
    router_transitions: usize,
    host_id: Option<HostId>,
    last_os_event: Option<(OsSessionEvent, u32)>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            ephemeral_users: UserList::new(),
            router_state: RouterState::Disabled,
            router_transitions: 0,
            host_id: None,
            last_os_event: None,
        }
    }

    /// Consume a descriptor and create the live session
    pub fn add_session(&mut self, descriptor: SessionDescriptor) -> Uuid {
        let session = LiveSession::from_descriptor(descriptor);
        let id = session.id();
        info!(
            session = %id,
            user = session.user_name(),
            kind = %session.session_type(),
            version = session.version(),
            "session started"
        );
        self.sessions.insert(id, session);
        id
    }

    /// Destroy a session on disconnect
    pub fn remove_session(&mut self, id: Uuid) -> Option<LiveSession> {
        let session = self.sessions.remove(&id);
        if let Some(session) = &session {
            info!(session = %id, user = session.user_name(), "session closed");
        }
        session
    }

    /// Look up a live session
    pub fn session_mut(&mut self, id: Uuid) -> Option<&mut LiveSession> {
        self.sessions.get_mut(&id)
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Record a router state transition
    pub fn set_router_state(&mut self, state: RouterState) {
        info!(state = %state, "router state changed");
        self.router_state = state;
        self.router_transitions += 1;
    }

    /// Current router state
    pub fn router_state(&self) -> RouterState {
        self.router_state
    }

    /// Number of state transitions recorded so far
    pub fn router_transitions(&self) -> usize {
        self.router_transitions
    }

    /// Record the host identity assigned by the router
    pub fn set_host_id(&mut self, host_id: HostId) {
        info!(host_id = %host_id, "host id assigned");
        self.host_id = Some(host_id);
    }

    /// Host identity, once assigned
    pub fn host_id(&self) -> Option<HostId> {
        self.host_id
    }

    /// Record an OS session status change
    pub fn set_session_event(&mut self, event: OsSessionEvent, os_session_id: u32) {
        debug!(?event, os_session_id, "os session event");
        self.last_os_event = Some((event, os_session_id));
    }

    /// Most recent OS session event
    pub fn last_os_event(&self) -> Option<(OsSessionEvent, u32)> {
        self.last_os_event
    }

    /// Grant a session-scoped credential
    pub fn add_ephemeral_user(&mut self, record: UserRecord) {
        debug!(user = record.name.as_str(), "ephemeral user granted");
        self.ephemeral_users.insert(record);
    }

    /// Revoke a session-scoped credential
    pub fn remove_ephemeral_user(&mut self, name: &str) -> Option<UserRecord> {
        let removed = self.ephemeral_users.remove(name);
        if removed.is_some() {
            debug!(user = name, "ephemeral user revoked");
        }
        removed
    }

    /// Snapshot of the ephemeral user list, merged into the persistent
    /// list during reconciliation
    pub fn ephemeral_users(&self) -> UserList {
        self.ephemeral_users.clone()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if !self.sessions.is_empty() {
            info!(count = self.sessions.len(), "destroying live sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{admit, Ingress};
    use tokio::net::{TcpListener, TcpStream};
    use vantage_core::types::UserProvenance;

    async fn descriptor(user: &str) -> SessionDescriptor {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        SessionDescriptor {
            session_type: SessionType::DesktopManage,
            version: "1.0".to_string(),
            user_name: user.to_string(),
            channel: admit(Ingress::Direct(server)).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_session() {
        let mut registry = SessionRegistry::new();
        let id = registry.add_session(descriptor("alice").await);
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.session_mut(id).unwrap().user_name(), "alice");

        let removed = registry.remove_session(id).unwrap();
        assert_eq!(removed.user_name(), "alice");
        assert_eq!(registry.session_count(), 0);
        assert!(registry.remove_session(id).is_none());
    }

    #[test]
    fn test_router_state_transitions_counted() {
        let mut registry = SessionRegistry::new();
        assert_eq!(registry.router_state(), RouterState::Disabled);
        assert_eq!(registry.router_transitions(), 0);

        registry.set_router_state(RouterState::Connecting);
        registry.set_router_state(RouterState::Connected);
        assert_eq!(registry.router_state(), RouterState::Connected);
        assert_eq!(registry.router_transitions(), 2);
    }

    #[test]
    fn test_host_id_recorded() {
        let mut registry = SessionRegistry::new();
        assert!(registry.host_id().is_none());
        registry.set_host_id(HostId::new(42));
        assert_eq!(registry.host_id(), Some(HostId::new(42)));
    }

    #[test]
    fn test_ephemeral_users_are_session_scoped() {
        let mut registry = SessionRegistry::new();
        registry.add_ephemeral_user(UserRecord::ephemeral("guest", &b"one-time"[..]));

        let snapshot = registry.ephemeral_users();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.find("guest").unwrap().provenance,
            UserProvenance::Ephemeral
        );

        assert!(registry.remove_ephemeral_user("guest").is_some());
        assert!(registry.ephemeral_users().is_empty());
    }

    #[test]
    fn test_os_session_event_recorded() {
        let mut registry = SessionRegistry::new();
        registry.set_session_event(OsSessionEvent::SignIn, 7);
        assert_eq!(
            registry.last_os_event(),
            Some((OsSessionEvent::SignIn, 7))
        );
    }
}

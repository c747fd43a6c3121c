//! Authentication handoff boundary
//!
//! The coordinator takes ownership of admitted channels and drives the
//! collaborator [`Authenticator`] against the current merged user list.
//! Success yields a [`SessionDescriptor`] delivered back to the
//! orchestrator; failure drops the channel with nothing but a debug log,
//! which is the whole contract at this boundary.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

use vantage_core::types::{SessionType, UserList};

use crate::admission::IngressChannel;

/// Size of the handshake challenge
const CHALLENGE_SIZE: usize = 32;

/// Handshake version reported in session descriptors
pub const HANDSHAKE_VERSION: &str = "1.0";

/// Errors produced by the authentication handshake
#[derive(Debug, Error)]
pub enum AuthError {
    /// The peer closed or sent garbage before completing the handshake
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The presented user name is not in the merged list
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// The proof did not match the user's secret
    #[error("Invalid proof")]
    InvalidProof,

    /// I/O error on the channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful authentication, consumed exactly once to
/// construct a live session
#[derive(Debug)]
pub struct SessionDescriptor {
    /// Kind of session the client requested
    pub session_type: SessionType,
    /// Handshake protocol version the client spoke
    pub version: String,
    /// Authenticated user name
    pub user_name: String,
    /// The channel, now owned by the session
    pub channel: IngressChannel,
}

/// Collaborator performing the cryptographic handshake.
///
/// Takes ownership of the channel; on failure the channel is simply
/// dropped, so there is no failure signal past this boundary.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate one channel against the merged user list
    async fn authenticate(
        &self,
        channel: IngressChannel,
        users: Arc<UserList>,
    ) -> Result<SessionDescriptor, AuthError>;
}

/// Owns in-flight handshakes and the current merged user list
pub struct AuthCoordinator {
    authenticator: Arc<dyn Authenticator>,
    users: Arc<UserList>,
    outcome_tx: mpsc::Sender<SessionDescriptor>,
    /// In-flight handshake tasks; aborted when the coordinator is
    /// destroyed, so no handshake outlives teardown
    tasks: JoinSet<()>,
}

impl AuthCoordinator {
    /// Create a coordinator seeded with the initial merged user list
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        users: UserList,
        outcome_tx: mpsc::Sender<SessionDescriptor>,
    ) -> Self {
        Self {
            authenticator,
            users: Arc::new(users),
            outcome_tx,
            tasks: JoinSet::new(),
        }
    }

    /// Replace the merged user list.
    ///
    /// Handshakes already in flight keep the list they started with.
    pub fn set_user_list(&mut self, users: UserList) {
        self.users = Arc::new(users);
    }

    /// Current merged list (for reconciliation tests)
    pub fn user_list(&self) -> &UserList {
        &self.users
    }

    /// Take ownership of an admitted channel and start its handshake
    pub fn enqueue(&mut self, channel: IngressChannel) {
        let authenticator = Arc::clone(&self.authenticator);
        let users = Arc::clone(&self.users);
        let outcome_tx = self.outcome_tx.clone();

        self.tasks.spawn(async move {
            match authenticator.authenticate(channel, users).await {
                Ok(descriptor) => {
                    let _ = outcome_tx.send(descriptor).await;
                }
                Err(e) => {
                    // Silent drop by contract; debug only.
                    debug!(error = %e, "authentication failed, dropping channel");
                }
            }
        });
    }
}

/// Default collaborator: challenge/digest handshake.
///
/// Wire sequence, all frames length-prefixed on the admitted channel:
/// host sends a random challenge; the client answers with a
/// bincode-encoded [`ClientHello`] whose proof is
/// `SHA-256(challenge || secret)`; the host replies with a single
/// acceptance byte. Anything else ends the handshake.
#[derive(Debug, Default)]
pub struct ChallengeAuthenticator;

/// Client half of the challenge handshake
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ClientHello {
    /// Login name
    pub user_name: String,
    /// Requested session kind
    pub session_type: SessionType,
    /// Handshake version the client speaks
    pub version: String,
    /// SHA-256 over challenge and secret
    pub proof: Vec<u8>,
}

/// Compute the expected handshake proof
pub fn handshake_proof(challenge: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(secret);
    hasher.finalize().to_vec()
}

#[async_trait]
impl Authenticator for ChallengeAuthenticator {
    async fn authenticate(
        &self,
        mut channel: IngressChannel,
        users: Arc<UserList>,
    ) -> Result<SessionDescriptor, AuthError> {
        let mut challenge = [0u8; CHALLENGE_SIZE];
        rand::thread_rng().fill_bytes(&mut challenge);
        channel.write_frame(&challenge).await?;

        let frame = channel
            .read_frame()
            .await?
            .ok_or_else(|| AuthError::Handshake("closed before hello".to_string()))?;
        let hello: ClientHello = bincode::deserialize(&frame)
            .map_err(|e| AuthError::Handshake(format!("malformed hello: {}", e)))?;

        let user = users
            .find(&hello.user_name)
            .ok_or_else(|| AuthError::UnknownUser(hello.user_name.clone()))?;

        let expected = handshake_proof(&challenge, &user.secret);
        if hello.proof != expected {
            return Err(AuthError::InvalidProof);
        }

        channel.write_frame(&[1]).await?;

        Ok(SessionDescriptor {
            session_type: hello.session_type,
            version: hello.version,
            user_name: hello.user_name,
            channel,
        })
    }
}

/// Drive the client half of the challenge handshake.
///
/// Used by tests and by tooling that needs to connect to a host.
pub async fn client_handshake(
    channel: &mut IngressChannel,
    user_name: &str,
    secret: &Bytes,
    session_type: SessionType,
) -> Result<(), AuthError> {
    let challenge = channel
        .read_frame()
        .await?
        .ok_or_else(|| AuthError::Handshake("closed before challenge".to_string()))?;

    let hello = ClientHello {
        user_name: user_name.to_string(),
        session_type,
        version: HANDSHAKE_VERSION.to_string(),
        proof: handshake_proof(&challenge, secret),
    };
    let encoded = bincode::serialize(&hello)
        .map_err(|e| AuthError::Handshake(format!("encode hello: {}", e)))?;
    channel.write_frame(&encoded).await?;

    let ack = channel
        .read_frame()
        .await?
        .ok_or_else(|| AuthError::Handshake("closed before ack".to_string()))?;
    if ack.as_ref() != [1] {
        return Err(AuthError::Handshake("rejected".to_string()));
    }
    Ok(())
}

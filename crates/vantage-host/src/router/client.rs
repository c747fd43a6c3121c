//! Router client
//!
//! Maintains the stateful outbound control connection to the relay
//! router. The client owns its connection lifecycle entirely: the
//! orchestrator only ever sees state transitions, the one-time identity
//! assignment, and relayed connections. Reconnect policy is internal.
//!
//! Every event carries the client's generation number. The orchestrator
//! replaces a client atomically on parameter change, and the generation
//! lets it drop stragglers from a destroyed instance.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vantage_core::config::BackoffConfig;
use vantage_core::types::{HostId, HostIdentity, RouterParameters, RouterState};
use vantage_core::RouterError;

use super::backoff::ReconnectBackoff;
use super::protocol::{RouterCodec, RouterMessage, ROUTER_PROTOCOL_VERSION};

/// Timeout for dialing the router or a relay endpoint
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the hello/ack exchange after connecting
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Event delivered to the orchestrator's control loop
#[derive(Debug)]
pub struct RouterEvent {
    /// Generation of the client instance that produced the event
    pub generation: u64,
    /// What happened
    pub kind: RouterEventKind,
}

/// Kinds of router events
#[derive(Debug)]
pub enum RouterEventKind {
    /// Observable connection-state transition
    StateChanged(RouterState),
    /// One-time identity assignment. `rotated_key` is present when the
    /// router replaced the host key; the orchestrator persists it
    /// before forwarding the identity.
    IdentityAssigned {
        /// The assigned identity, with the now-current key
        identity: HostIdentity,
        /// Replacement key, if the router rotated it
        rotated_key: Option<Bytes>,
    },
    /// A connection claimed from the relay; enters admission as relayed
    /// ingress
    Relayed(TcpStream),
}

/// Handle to a live router-client instance.
///
/// Dropping the handle cancels the background task. At most one
/// instance exists at a time; replacement is atomic, never incremental.
#[derive(Debug)]
pub struct RouterClient {
    params: RouterParameters,
    generation: u64,
    cancel: CancellationToken,
}

impl RouterClient {
    /// Spawn a client for `params`, reporting events tagged with
    /// `generation`.
    pub fn connect(
        params: RouterParameters,
        generation: u64,
        backoff: BackoffConfig,
        events: mpsc::Sender<RouterEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();

        let task_params = params.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run(task_params, generation, backoff, events, task_cancel).await;
        });

        Self {
            params,
            generation,
            cancel,
        }
    }

    /// Parameters this instance was created with; compared by value
    /// during reconciliation
    pub fn params(&self) -> &RouterParameters {
        &self.params
    }

    /// Generation of this instance
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record a key rotation so a later reconciliation pass does not
    /// mistake the persisted key for a parameter change.
    pub fn note_rotated_key(&mut self, key: Bytes) {
        self.params.host_key = key;
    }
}

impl Drop for RouterClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Event sender bound to one client generation
#[derive(Clone)]
struct Reporter {
    generation: u64,
    tx: mpsc::Sender<RouterEvent>,
}

impl Reporter {
    /// Send an event; `Err` means the orchestrator is gone and the task
    /// should end.
    async fn send(&self, kind: RouterEventKind) -> Result<(), ()> {
        self.tx
            .send(RouterEvent {
                generation: self.generation,
                kind,
            })
            .await
            .map_err(|_| ())
    }

    async fn state(&self, state: RouterState) -> Result<(), ()> {
        self.send(RouterEventKind::StateChanged(state)).await
    }
}

async fn run(
    mut params: RouterParameters,
    generation: u64,
    backoff: BackoffConfig,
    events: mpsc::Sender<RouterEvent>,
    cancel: CancellationToken,
) {
    let reporter = Reporter {
        generation,
        tx: events,
    };
    let mut backoff = ReconnectBackoff::from_config(&backoff);
    let mut identity_reported = false;

    loop {
        if reporter.state(RouterState::Connecting).await.is_err() {
            return;
        }

        let established = tokio::select! {
            _ = cancel.cancelled() => return,
            result = establish(&params) => result,
        };

        match established {
            Ok((framed, host_id, rotated_key)) => {
                info!(address = %params.address, port = params.port, "connected to the router");
                backoff.reset();

                // Every later reconnect must present the rotated key.
                if let Some(key) = &rotated_key {
                    params.host_key = key.clone();
                }

                if !identity_reported {
                    identity_reported = true;
                    let assigned = RouterEventKind::IdentityAssigned {
                        identity: HostIdentity {
                            host_id,
                            host_key: params.host_key.clone(),
                        },
                        rotated_key,
                    };
                    if reporter.send(assigned).await.is_err() {
                        return;
                    }
                }

                if reporter.state(RouterState::Connected).await.is_err() {
                    return;
                }

                serve(framed, &reporter, &cancel).await;
                if cancel.is_cancelled() {
                    return;
                }
                if reporter.state(RouterState::Error).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(address = %params.address, port = params.port, error = %e,
                      "router connection failed");
                if reporter.state(RouterState::Error).await.is_err() {
                    return;
                }
            }
        }

        let delay = backoff.next_delay();
        debug!(?delay, "retrying router connection");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Dial the router and complete the hello exchange
async fn establish(
    params: &RouterParameters,
) -> Result<(Framed<TcpStream, RouterCodec>, HostId, Option<Bytes>), RouterError> {
    let stream = tokio::time::timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((params.address.as_str(), params.port)),
    )
    .await
    .map_err(|_| RouterError::ConnectionFailed("connect timed out".to_string()))?
    .map_err(|e| RouterError::ConnectionFailed(e.to_string()))?;
    stream.set_nodelay(true)?;

    let mut framed = Framed::new(stream, RouterCodec);
    framed
        .send(RouterMessage::HostHello {
            host_key: params.host_key.to_vec(),
            version: ROUTER_PROTOCOL_VERSION.to_string(),
        })
        .await?;

    let deadline = tokio::time::Instant::now() + HELLO_TIMEOUT;
    loop {
        let next = tokio::time::timeout_at(deadline, framed.next())
            .await
            .map_err(|_| RouterError::ConnectionFailed("hello timed out".to_string()))?;

        match next {
            Some(Ok(RouterMessage::HelloAck {
                host_id,
                rotated_key,
            })) => {
                return Ok((framed, HostId::new(host_id), rotated_key.map(Bytes::from)));
            }
            Some(Ok(RouterMessage::Keepalive)) => continue,
            Some(Ok(other)) => {
                return Err(RouterError::Protocol(format!(
                    "unexpected message during hello: {:?}",
                    other
                )));
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(RouterError::ConnectionLost(
                    "closed during hello".to_string(),
                ));
            }
        }
    }
}

/// Serve the established control connection until it ends
async fn serve(
    mut framed: Framed<TcpStream, RouterCodec>,
    reporter: &Reporter,
    cancel: &CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = framed.next() => message,
        };

        match message {
            Some(Ok(RouterMessage::ConnectionOffer { relay_addr, secret })) => {
                debug!(relay = %relay_addr, "connection offered by the router");
                let reporter = reporter.clone();
                tokio::spawn(async move {
                    claim_relayed(relay_addr, secret, reporter).await;
                });
            }
            Some(Ok(RouterMessage::Keepalive)) => {
                debug!("router keepalive");
            }
            Some(Ok(other)) => {
                debug!(message = ?other, "ignoring unexpected router message");
            }
            Some(Err(e)) => {
                warn!(error = %e, "router control connection error");
                return;
            }
            None => {
                info!("router closed the control connection");
                return;
            }
        }
    }
}

/// Dial a relay endpoint, present the claim secret, and hand the stream
/// to the orchestrator as relayed ingress
async fn claim_relayed(relay_addr: String, secret: Vec<u8>, reporter: Reporter) {
    let claimed = tokio::time::timeout(CONNECT_TIMEOUT, async {
        let mut stream = TcpStream::connect(&relay_addr).await?;
        use tokio::io::AsyncWriteExt;
        stream.write_u32(secret.len() as u32).await?;
        stream.write_all(&secret).await?;
        stream.flush().await?;
        Ok::<_, std::io::Error>(stream)
    })
    .await;

    match claimed {
        Ok(Ok(stream)) => {
            let _ = reporter.send(RouterEventKind::Relayed(stream)).await;
        }
        Ok(Err(e)) => {
            warn!(relay = %relay_addr, error = %e, "failed to claim relayed connection");
        }
        Err(_) => {
            warn!(relay = %relay_addr, "relay claim timed out");
        }
    }
}

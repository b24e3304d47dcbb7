use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rexec_transport::{Datagram, UdpEndpoint};
use rexec_wire::{decode, encode, Body, CommandResult, ExecMode, NodeIdentity};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{LocalNode, SessionConfig};
use crate::control::{send, Origin};
use crate::dispatcher::{self, PendingCommands};
use crate::error::{PeerError, Result};
use crate::handshake::{new_connection_id, open_handshake, OpenRequest};

const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle of a [`Connection`].
///
/// `Closed -> Opening -> Open -> Closing -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Opening => "OPENING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical connection to one remote node.
///
/// The connection owns a unicast socket and a background task that routes
/// everything the node sends back: open acknowledgements, command results,
/// and close notices. Results are matched to waiting commands by command id,
/// in any order.
///
/// Dropping an open connection sends a best-effort `close`.
pub struct Connection {
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
}

pub(crate) struct Shared {
    pub(crate) endpoint: UdpEndpoint,
    pub(crate) origin: Origin,
    pub(crate) remote: NodeIdentity,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) connection_id: String,
    pub(crate) config: SessionConfig,
    pub(crate) pending: PendingCommands,
    state: Mutex<ConnectionState>,
    acknowledged: watch::Sender<bool>,
    next_command_id: AtomicU64,
}

impl Connection {
    /// Prepare a connection to `remote`. The connection starts `Closed`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(remote: NodeIdentity, local: &LocalNode, config: SessionConfig) -> Result<Self> {
        let remote_addr = remote.socket_addr()?;
        let endpoint = UdpEndpoint::bind_unicast(&config.network)?;
        let origin = Origin::new(&local.id, &local.label, &endpoint);
        let (acknowledged, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            endpoint,
            origin,
            remote,
            remote_addr,
            connection_id: new_connection_id(),
            config,
            pending: PendingCommands::default(),
            state: Mutex::new(ConnectionState::Closed),
            acknowledged,
            next_command_id: AtomicU64::new(1),
        });
        let receiver = tokio::spawn(receive_loop(Arc::clone(&shared)));

        Ok(Self { shared, receiver })
    }

    /// Open the connection: `Closed -> Opening -> Open`.
    ///
    /// Fails with [`PeerError::ConnectionTimeout`] when the node does not
    /// answer within the configured open timeout; the connection is then
    /// `Closed` again.
    pub async fn open(&self) -> Result<()> {
        let shared = &self.shared;
        shared.transition(ConnectionState::Closed, ConnectionState::Opening)?;
        shared.acknowledged.send_replace(false);
        let acks = shared.acknowledged.subscribe();

        let outcome = open_handshake(
            OpenRequest {
                endpoint: &shared.endpoint,
                origin: &shared.origin,
                remote: &shared.remote,
                remote_addr: shared.remote_addr,
                connection_id: &shared.connection_id,
                timeout: shared.config.open_timeout,
            },
            acks,
        )
        .await;

        match outcome {
            Ok(latency) => {
                if shared
                    .transition(ConnectionState::Opening, ConnectionState::Open)
                    .is_err()
                {
                    shared.set_state(ConnectionState::Closed);
                    return Err(PeerError::HandshakeFailed(
                        "node closed the connection during open".to_string(),
                    ));
                }
                info!(
                    node = %shared.remote,
                    connection_id = %shared.connection_id,
                    latency = ?latency,
                    "connection open"
                );
                Ok(())
            }
            Err(err) => {
                shared.set_state(ConnectionState::Closed);
                warn!(node = %shared.remote, error = %err, "open failed");
                Err(err)
            }
        }
    }

    /// Close the connection: `Open -> Closing -> Closed`.
    ///
    /// The close notice is fire-and-forget; the connection ends `Closed`
    /// even if sending fails. Closing a closed connection does nothing.
    /// Commands still waiting fail with [`PeerError::NotConnected`].
    pub async fn close(&self) -> Result<()> {
        let shared = &self.shared;
        match shared.state() {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Open => {}
            actual => {
                return Err(PeerError::InvalidState {
                    expected: ConnectionState::Open,
                    actual,
                })
            }
        }

        shared.set_state(ConnectionState::Closing);
        let close = shared
            .origin
            .close(&shared.connection_id, &shared.remote.id);
        if let Err(err) = send(&shared.endpoint, &close, shared.remote_addr).await {
            warn!(node = %shared.remote, error = %err, "close notice not sent");
        }
        shared.set_state(ConnectionState::Closed);
        shared.pending.clear();
        info!(node = %shared.remote, connection_id = %shared.connection_id, "connection closed");
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Identity of this connection, carried by every session message.
    pub fn connection_id(&self) -> &str {
        &self.shared.connection_id
    }

    /// The node this connection targets.
    pub fn remote(&self) -> &NodeIdentity {
        &self.shared.remote
    }

    /// Local identity as advertised to the node.
    pub fn local(&self) -> &NodeIdentity {
        self.shared.origin.identity()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Run `payload` with the configured command timeout.
    ///
    /// A failed remote execution is returned as a result with
    /// `success == false`, not as an error.
    pub async fn execute(&self, mode: ExecMode, payload: &str) -> Result<CommandResult> {
        dispatcher::execute(self, mode, payload, self.shared.config.command_timeout).await
    }

    /// Run `payload` with an explicit timeout.
    pub async fn execute_with_timeout(
        &self,
        mode: ExecMode,
        payload: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        dispatcher::execute(self, mode, payload, timeout).await
    }

    /// Like [`Connection::execute`], but a failed remote execution becomes
    /// [`PeerError::RemoteExecution`].
    pub async fn execute_checked(&self, mode: ExecMode, payload: &str) -> Result<CommandResult> {
        let result = self.execute(mode, payload).await?;
        dispatcher::check(&self.shared.remote, result)
    }

    /// Commands currently waiting for a result.
    pub fn pending_commands(&self) -> usize {
        self.shared.pending.len()
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let shared = &self.shared;
        if shared.state() == ConnectionState::Open {
            let close = shared
                .origin
                .close(&shared.connection_id, &shared.remote.id);
            let sent = encode(&close).map_err(PeerError::from).and_then(|bytes| {
                shared
                    .endpoint
                    .try_send_to(&bytes, shared.remote_addr)
                    .map_err(PeerError::from)
            });
            match sent {
                Ok(()) => debug!(node = %shared.remote, "close sent on drop"),
                Err(err) => debug!(node = %shared.remote, error = %err, "close on drop failed"),
            }
            shared.set_state(ConnectionState::Closed);
        }
        shared.pending.clear();
        self.receiver.abort();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.shared.connection_id)
            .field("remote", &self.shared.remote)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl Shared {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *state, next);
        trace!(from = %previous, to = %next, connection_id = %self.connection_id, "state change");
    }

    fn transition(&self, expected: ConnectionState, next: ConnectionState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != expected {
            return Err(PeerError::InvalidState {
                expected,
                actual: *state,
            });
        }
        trace!(from = %expected, to = %next, connection_id = %self.connection_id, "state change");
        *state = next;
        Ok(())
    }

    pub(crate) fn next_command_id(&self) -> u64 {
        self.next_command_id.fetch_add(1, Ordering::Relaxed)
    }

    fn route(&self, datagram: Datagram) {
        let message = match decode(&datagram.payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(from = %datagram.from, error = %err, "dropping malformed datagram");
                return;
            }
        };

        if message.source_id != self.remote.id
            || !message.is_addressed_to(&self.origin.identity().id)
            || message.body.connection_id() != Some(self.connection_id.as_str())
        {
            trace!(
                from = %datagram.from,
                kind = %message.kind(),
                "ignoring message for another session"
            );
            return;
        }

        self.acknowledged
            .send_if_modified(|acked| !std::mem::replace(acked, true));

        match message.body {
            Body::CommandResult(result) => self.pending.complete(result),
            Body::Close { .. } => {
                info!(node = %self.remote, connection_id = %self.connection_id, "node closed connection");
                self.set_state(ConnectionState::Closed);
                self.pending.clear();
            }
            Body::Open { .. } => {
                trace!(node = %self.remote, "open acknowledged");
            }
            other => {
                debug!(kind = %other.kind(), "unexpected message on session socket");
            }
        }
    }
}

async fn receive_loop(shared: Arc<Shared>) {
    loop {
        match shared.endpoint.recv().await {
            Ok(datagram) => shared.route(datagram),
            Err(err) => {
                warn!(addr = %shared.endpoint.local_addr(), error = %err, "session receive failed");
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            }
        }
    }
}

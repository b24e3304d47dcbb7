//! Remote side of the protocol.
//!
//! A [`NodeResponder`] answers discovery pings, acknowledges connections,
//! and runs commands through an [`Executor`]. It stands in for a real
//! application node in tests and in `rexec mock-node`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rexec_transport::{Datagram, MulticastConfig, UdpEndpoint};
use rexec_wire::{
    decode, encode, Body, Command, CommandResult, Message, NodeIdentity, OutputEntry, RecentIds,
    WireError,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{LocalNode, DEFAULT_DEDUP_WINDOW};
use crate::control::{reply_addr, send, Origin};
use crate::error::Result;
use crate::handshake::validate_connection_id;

const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of running one command on the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub success: bool,
    pub output: Vec<OutputEntry>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Execution {
    /// Successful run with no value.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Successful evaluation producing `value`.
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(value.into()),
            ..Self::default()
        }
    }

    /// Failed run.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: vec![OutputEntry::new("Error", error.clone())],
            result: None,
            error: Some(error),
        }
    }

    /// Append one captured log line.
    pub fn with_output(mut self, kind: impl Into<String>, text: impl Into<String>) -> Self {
        self.output.push(OutputEntry::new(kind, text));
        self
    }

    fn into_result(self, command: &Command) -> CommandResult {
        CommandResult {
            connection_id: command.connection_id.clone(),
            command_id: command.command_id,
            success: self.success,
            output: self.output,
            result: self.result,
            error: self.error,
        }
    }
}

/// Runs command payloads on a node.
///
/// Called on a blocking thread; implementations may block.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, command: &Command) -> Execution;
}

impl<F> Executor for F
where
    F: Fn(&Command) -> Execution + Send + Sync + 'static,
{
    fn execute(&self, command: &Command) -> Execution {
        self(command)
    }
}

/// A running node.
///
/// Dropping the responder aborts its tasks; [`NodeResponder::stop`] also
/// announces the departure on the group.
pub struct NodeResponder {
    origin: Origin,
    unicast: Arc<UdpEndpoint>,
    group_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Node<E> {
    origin: Origin,
    unicast: Arc<UdpEndpoint>,
    executor: Arc<E>,
    open: Mutex<HashSet<String>>,
    seen: Mutex<RecentIds>,
}

impl NodeResponder {
    /// Bind the group and unicast sockets and start answering.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<E: Executor>(
        network: &MulticastConfig,
        local: LocalNode,
        executor: E,
    ) -> Result<Self> {
        let group = Arc::new(UdpEndpoint::bind_group(network)?);
        let unicast = Arc::new(UdpEndpoint::bind_unicast(network)?);
        let origin = Origin::new(&local.id, &local.label, &unicast);
        let group_addr = if network.is_multicast() {
            network.group_addr()
        } else {
            group.local_addr()
        };

        let node = Arc::new(Node {
            origin: origin.clone(),
            unicast: Arc::clone(&unicast),
            executor: Arc::new(executor),
            open: Mutex::new(HashSet::new()),
            seen: Mutex::new(RecentIds::new(DEFAULT_DEDUP_WINDOW)),
        });
        let shutdown = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(serve(Arc::clone(&node), group, shutdown.clone())),
            tokio::spawn(serve(node, Arc::clone(&unicast), shutdown.clone())),
        ];

        info!(node = %origin.identity(), group = %group_addr, "node responder started");

        Ok(Self {
            origin,
            unicast,
            group_addr,
            shutdown,
            tasks,
        })
    }

    /// Identity the node advertises in its replies.
    pub fn identity(&self) -> &NodeIdentity {
        self.origin.identity()
    }

    /// Address callers should send pings to.
    pub fn group_addr(&self) -> SocketAddr {
        self.group_addr
    }

    /// Stop serving and announce the departure.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Err(err) = send(&self.unicast, &self.origin.disconnect(), self.group_addr).await {
            debug!(error = %err, "disconnect beacon not sent");
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(node = %self.origin.identity(), "node responder stopped");
    }
}

impl Drop for NodeResponder {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for NodeResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeResponder")
            .field("identity", self.origin.identity())
            .field("group_addr", &self.group_addr)
            .finish()
    }
}

async fn serve<E: Executor>(
    node: Arc<Node<E>>,
    endpoint: Arc<UdpEndpoint>,
    shutdown: CancellationToken,
) {
    loop {
        let datagram = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = endpoint.recv() => match received {
                Ok(datagram) => datagram,
                Err(err) => {
                    warn!(addr = %endpoint.local_addr(), error = %err, "node receive failed");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };
        node.handle(datagram).await;
    }
}

impl<E: Executor> Node<E> {
    fn local_id(&self) -> &str {
        &self.origin.identity().id
    }

    async fn handle(self: &Arc<Self>, datagram: Datagram) {
        let message = match decode(&datagram.payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(from = %datagram.from, error = %err, "dropping malformed datagram");
                return;
            }
        };
        if message.source_id == self.local_id() || !message.is_addressed_to(self.local_id()) {
            return;
        }
        let first = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .first_sighting(&message);
        if !first {
            trace!(node = %message.source_id, message_id = message.message_id, "duplicate dropped");
            return;
        }

        let to = match reply_addr(&message, datagram.from) {
            Ok(to) => to,
            Err(err) => {
                debug!(from = %datagram.from, error = %err, "no usable reply address");
                return;
            }
        };

        let caller = message.source_id.clone();
        match message.body {
            Body::Ping { .. } => {
                self.reply(self.origin.pong(&caller), to).await;
            }
            Body::Open { connection_id } => {
                if let Err(err) = validate_connection_id(&connection_id) {
                    debug!(error = %err, "rejecting open");
                    return;
                }
                self.open_set().insert(connection_id.clone());
                info!(caller = %caller, connection_id = %connection_id, "connection opened");
                self.reply(self.origin.open(&connection_id, &caller), to)
                    .await;
            }
            Body::Close { connection_id } => {
                if self.open_set().remove(&connection_id) {
                    info!(caller = %caller, connection_id = %connection_id, "connection closed");
                }
            }
            Body::Command(command) => {
                let node = Arc::clone(self);
                tokio::spawn(async move { node.run(command, caller, to).await });
            }
            Body::Pong { .. } | Body::Disconnect { .. } | Body::CommandResult(_) => {
                trace!(from = %caller, "ignoring message meant for callers");
            }
        }
    }

    async fn run(&self, command: Command, caller: String, to: SocketAddr) {
        let execution = if !self.open_set().contains(&command.connection_id) {
            Execution::failed(format!(
                "connection {} is not open",
                command.connection_id
            ))
        } else {
            debug!(
                command_id = command.command_id,
                mode = %command.mode,
                "executing command"
            );
            let executor = Arc::clone(&self.executor);
            let job = command.clone();
            match tokio::task::spawn_blocking(move || executor.execute(&job)).await {
                Ok(execution) => execution,
                Err(err) => Execution::failed(format!("executor panicked: {err}")),
            }
        };

        let result = execution.into_result(&command);
        let mut message = self.origin.command_result(result, &caller);
        if let Err(WireError::TooLarge { size, max }) = encode(&message) {
            warn!(
                command_id = command.command_id,
                size,
                max,
                "result does not fit in a datagram; reporting failure"
            );
            let replacement =
                Execution::failed(format!("result too large ({size} bytes, max {max})"))
                    .into_result(&command);
            message = self.origin.command_result(replacement, &caller);
        }
        self.reply(message, to).await;
    }

    async fn reply(&self, message: Message, to: SocketAddr) {
        if let Err(err) = send(&self.unicast, &message, to).await {
            warn!(to = %to, kind = %message.kind(), error = %err, "reply failed");
        }
    }

    fn open_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use rexec_wire::{encode, ExecMode};

    use super::*;

    fn loopback() -> MulticastConfig {
        MulticastConfig::loopback("127.0.0.1:0".parse().unwrap())
    }

    fn caller() -> (std::net::UdpSocket, NodeIdentity) {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let identity = NodeIdentity::new("caller", "", socket.local_addr().unwrap());
        (socket, identity)
    }

    fn exchange(
        socket: &std::net::UdpSocket,
        message: &Message,
        to: SocketAddr,
    ) -> Message {
        socket.send_to(&encode(message).unwrap(), to).unwrap();
        let mut buf = [0u8; 4096];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        decode(&buf[..len]).unwrap()
    }

    #[test]
    fn execution_constructors() {
        assert!(Execution::ok().success);
        assert_eq!(Execution::value("42").result.as_deref(), Some("42"));

        let failed = Execution::failed("NameError");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("NameError"));
        assert_eq!(failed.output[0].kind, "Error");
    }

    #[tokio::test]
    async fn answers_ping_with_pong() {
        let responder =
            NodeResponder::start(&loopback(), LocalNode::new("Sandbox"), |_: &Command| {
                Execution::ok()
            })
            .unwrap();
        let group = responder.group_addr();
        let node_id = responder.identity().id.clone();

        let reply = tokio::task::spawn_blocking(move || {
            let (socket, identity) = caller();
            exchange(
                &socket,
                &Message::new(&identity, 1, Body::Ping { timestamp: 0 }),
                group,
            )
        })
        .await
        .unwrap();

        assert!(matches!(reply.body, Body::Pong { .. }));
        assert_eq!(reply.source_id, node_id);
        assert_eq!(reply.source_label, "Sandbox");
        assert_eq!(reply.dest_id.as_deref(), Some("caller"));
    }

    #[tokio::test]
    async fn commands_require_an_open_connection() {
        let responder =
            NodeResponder::start(&loopback(), LocalNode::new("Sandbox"), |_: &Command| {
                Execution::value("42")
            })
            .unwrap();
        let node_addr = responder.identity().socket_addr().unwrap();

        let (refused, accepted) = tokio::task::spawn_blocking(move || {
            let (socket, identity) = caller();
            let command = |message_id: u64, command_id: u64| {
                Message::new(
                    &identity,
                    message_id,
                    Body::Command(Command {
                        connection_id: "c-1".to_string(),
                        command_id,
                        mode: ExecMode::EvaluateStatement,
                        payload: "21 * 2".to_string(),
                        unattended: true,
                    }),
                )
            };

            let refused = exchange(&socket, &command(1, 1), node_addr);
            let ack = exchange(
                &socket,
                &Message::new(
                    &identity,
                    2,
                    Body::Open {
                        connection_id: "c-1".to_string(),
                    },
                ),
                node_addr,
            );
            assert!(matches!(ack.body, Body::Open { .. }));
            let accepted = exchange(&socket, &command(3, 2), node_addr);
            (refused, accepted)
        })
        .await
        .unwrap();

        match refused.body {
            Body::CommandResult(result) => {
                assert!(!result.success);
                assert_eq!(result.command_id, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match accepted.body {
            Body::CommandResult(result) => {
                assert!(result.success);
                assert_eq!(result.command_id, 2);
                assert_eq!(result.result.as_deref(), Some("42"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

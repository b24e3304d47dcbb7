use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rexec_transport::UdpEndpoint;
use rexec_wire::{encode, Body, Command, CommandResult, Message, NodeIdentity};

use crate::error::Result;

/// Low bits left for messages sent within one millisecond of startup.
const MESSAGE_ID_SHIFT: u32 = 16;

/// Seeded from the startup time so a restarted process with a fixed node id
/// does not reuse ids its peers still remember.
static NEXT_MESSAGE_ID: LazyLock<AtomicU64> =
    LazyLock::new(|| AtomicU64::new(message_id_seed(now_millis())));

fn message_id_seed(startup_millis: u64) -> u64 {
    (startup_millis << MESSAGE_ID_SHIFT).max(1)
}

/// Distinct per process; paired with the sender id it identifies a message.
pub(crate) fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Builds outgoing messages stamped with one local identity.
#[derive(Debug, Clone)]
pub(crate) struct Origin {
    identity: NodeIdentity,
}

impl Origin {
    pub(crate) fn new(id: &str, label: &str, endpoint: &UdpEndpoint) -> Self {
        Self {
            identity: NodeIdentity::new(id, label, endpoint.advertised_addr()),
        }
    }

    pub(crate) fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub(crate) fn message(&self, body: Body) -> Message {
        Message::new(&self.identity, next_message_id(), body)
    }

    pub(crate) fn ping(&self) -> Message {
        self.message(Body::Ping {
            timestamp: now_millis(),
        })
    }

    pub(crate) fn pong(&self, dest: &str) -> Message {
        self.message(Body::Pong {
            timestamp: now_millis(),
        })
        .with_dest(dest)
    }

    pub(crate) fn disconnect(&self) -> Message {
        self.message(Body::Disconnect {
            timestamp: now_millis(),
        })
    }

    pub(crate) fn open(&self, connection_id: &str, dest: &str) -> Message {
        self.message(Body::Open {
            connection_id: connection_id.to_string(),
        })
        .with_dest(dest)
    }

    pub(crate) fn close(&self, connection_id: &str, dest: &str) -> Message {
        self.message(Body::Close {
            connection_id: connection_id.to_string(),
        })
        .with_dest(dest)
    }

    pub(crate) fn command(&self, command: Command, dest: &str) -> Message {
        self.message(Body::Command(command)).with_dest(dest)
    }

    pub(crate) fn command_result(&self, result: CommandResult, dest: &str) -> Message {
        self.message(Body::CommandResult(result)).with_dest(dest)
    }
}

/// Encode and send one message.
pub(crate) async fn send(endpoint: &UdpEndpoint, message: &Message, to: SocketAddr) -> Result<()> {
    let bytes = encode(message)?;
    endpoint.send_to(&bytes, to).await?;
    Ok(())
}

/// Where replies to `message` should go.
///
/// The advertised address wins unless its host is a wildcard, in which case
/// the datagram's source IP is paired with the advertised port.
pub(crate) fn reply_addr(message: &Message, from: SocketAddr) -> Result<SocketAddr> {
    let advertised = message.source().socket_addr()?;
    if advertised.ip().is_unspecified() {
        Ok(SocketAddr::new(from.ip(), advertised.port()))
    } else {
        Ok(advertised)
    }
}

/// Sender identity with a reachable reply host.
pub(crate) fn resolved_source(message: &Message, from: SocketAddr) -> Result<NodeIdentity> {
    let addr = reply_addr(message, from)?;
    Ok(NodeIdentity::new(
        message.source_id.clone(),
        message.source_label.clone(),
        addr,
    ))
}

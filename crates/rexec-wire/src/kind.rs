//! Message type discriminants.
//!
//! Beacon kinds travel on the discovery group; session kinds travel
//! unicast between a caller's connection socket and a node.

/// Discovery request, answered with a pong.
pub const PING: &str = "ping";

/// Discovery reply, sent unicast to the pinging node.
pub const PONG: &str = "pong";

/// Explicit departure; receivers evict the sender immediately.
pub const DISCONNECT: &str = "disconnect";

/// Connection open request (and its acknowledgement).
pub const OPEN: &str = "open";

/// Connection close notice. Never acknowledged.
pub const CLOSE: &str = "close";

/// Code to execute on the node.
pub const COMMAND: &str = "command";

/// Outcome of one command.
pub const COMMAND_RESULT: &str = "command_result";

/// All message kinds known to this protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping,
    Pong,
    Disconnect,
    Open,
    Close,
    Command,
    CommandResult,
}

impl MessageKind {
    /// Wire name used in the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Ping => PING,
            MessageKind::Pong => PONG,
            MessageKind::Disconnect => DISCONNECT,
            MessageKind::Open => OPEN,
            MessageKind::Close => CLOSE,
            MessageKind::Command => COMMAND,
            MessageKind::CommandResult => COMMAND_RESULT,
        }
    }

    /// Parse a wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            PING => Some(MessageKind::Ping),
            PONG => Some(MessageKind::Pong),
            DISCONNECT => Some(MessageKind::Disconnect),
            OPEN => Some(MessageKind::Open),
            CLOSE => Some(MessageKind::Close),
            COMMAND => Some(MessageKind::Command),
            COMMAND_RESULT => Some(MessageKind::CommandResult),
            _ => None,
        }
    }

    /// Returns true for ping/pong/disconnect.
    pub fn is_beacon(self) -> bool {
        matches!(
            self,
            MessageKind::Ping | MessageKind::Pong | MessageKind::Disconnect
        )
    }

    /// Returns true for messages scoped to a connection identity.
    pub fn is_session(self) -> bool {
        !self.is_beacon()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};
use crate::kind::MessageKind;

/// Protocol marker carried by every message.
pub const MAGIC: &str = "rexec";

/// Protocol version carried by every message.
pub const PROTOCOL_VERSION: u32 = 1;

/// Identity and reply address of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Opaque unique identifier.
    pub id: String,
    /// Human-readable label (for example a project name).
    #[serde(default)]
    pub label: String,
    /// Reply host, an IP literal.
    pub host: String,
    /// Reply port.
    pub port: u16,
}

impl NodeIdentity {
    pub fn new(id: impl Into<String>, label: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// Parse the advertised reply address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| WireError::InvalidAddress {
                host: self.host.clone(),
                port: self.port,
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "{} at {}:{}", self.id, self.host, self.port)
        } else {
            write!(
                f,
                "{} ({}) at {}:{}",
                self.label, self.id, self.host, self.port
            )
        }
    }
}

/// How the node runs a command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecMode {
    /// Run the payload as a script (literal code or a file path with
    /// arguments). No return value.
    ExecuteFile,
    /// Run the payload as a single statement. No return value.
    ExecuteStatement,
    /// Evaluate the payload as an expression; its value is reported as text.
    EvaluateStatement,
}

impl ExecMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecMode::ExecuteFile => "ExecuteFile",
            ExecMode::ExecuteStatement => "ExecuteStatement",
            ExecMode::EvaluateStatement => "EvaluateStatement",
        }
    }

    /// Whether results of this mode carry a captured return value.
    pub fn returns_value(self) -> bool {
        matches!(self, ExecMode::EvaluateStatement)
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_unattended() -> bool {
    true
}

/// A command sent over an open connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub connection_id: String,
    /// Unique per command within a connection; echoed in the result.
    pub command_id: u64,
    pub mode: ExecMode,
    pub payload: String,
    /// Suppress interactive prompts on the node.
    #[serde(default = "default_unattended")]
    pub unattended: bool,
}

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    /// Log category reported by the node (for example `Info` or `Error`).
    #[serde(rename = "type")]
    pub kind: String,
    pub output: String,
}

impl OutputEntry {
    pub fn new(kind: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            output: output.into(),
        }
    }
}

/// Outcome of one command, produced once by the node.
///
/// `success == false` means the remote code failed; it is still a complete
/// protocol exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub connection_id: String,
    pub command_id: u64,
    pub success: bool,
    #[serde(default)]
    pub output: Vec<OutputEntry>,
    /// Text form of the evaluated value (`EvaluateStatement` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// Captured output rendered as `"<type>: <output>"` lines.
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .map(|entry| format!("{}: {}", entry.kind, entry.output))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Message body, selected by the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
    Disconnect { timestamp: u64 },
    Open { connection_id: String },
    Close { connection_id: String },
    Command(Command),
    CommandResult(CommandResult),
}

impl Body {
    pub fn kind(&self) -> MessageKind {
        match self {
            Body::Ping { .. } => MessageKind::Ping,
            Body::Pong { .. } => MessageKind::Pong,
            Body::Disconnect { .. } => MessageKind::Disconnect,
            Body::Open { .. } => MessageKind::Open,
            Body::Close { .. } => MessageKind::Close,
            Body::Command(_) => MessageKind::Command,
            Body::CommandResult(_) => MessageKind::CommandResult,
        }
    }

    /// Connection identity for session messages.
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Body::Open { connection_id } | Body::Close { connection_id } => Some(connection_id),
            Body::Command(command) => Some(&command.connection_id),
            Body::CommandResult(result) => Some(&result.connection_id),
            Body::Ping { .. } | Body::Pong { .. } | Body::Disconnect { .. } => None,
        }
    }

    /// Emission time (milliseconds since the Unix epoch) for beacons.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Body::Ping { timestamp } | Body::Pong { timestamp } | Body::Disconnect { timestamp } => {
                Some(*timestamp)
            }
            _ => None,
        }
    }
}

/// One protocol message: sender envelope plus body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub magic: String,
    pub version: u32,
    /// Distinct per sender; `(source_id, message_id)` identifies a message.
    pub message_id: u64,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_label: String,
    pub source_host: String,
    pub source_port: u16,
    /// Target node id. Absent means any receiver may act on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_id: Option<String>,
    #[serde(flatten)]
    pub body: Body,
}

impl Message {
    /// Build a message from `source` with the current protocol magic/version.
    pub fn new(source: &NodeIdentity, message_id: u64, body: Body) -> Self {
        Self {
            magic: MAGIC.to_string(),
            version: PROTOCOL_VERSION,
            message_id,
            source_id: source.id.clone(),
            source_label: source.label.clone(),
            source_host: source.host.clone(),
            source_port: source.port,
            dest_id: None,
            body,
        }
    }

    /// Address the message to one node.
    pub fn with_dest(mut self, dest_id: impl Into<String>) -> Self {
        self.dest_id = Some(dest_id.into());
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Sender identity as advertised in the envelope.
    pub fn source(&self) -> NodeIdentity {
        NodeIdentity {
            id: self.source_id.clone(),
            label: self.source_label.clone(),
            host: self.source_host.clone(),
            port: self.source_port,
        }
    }

    /// True when the message has no destination or names `node_id`.
    pub fn is_addressed_to(&self, node_id: &str) -> bool {
        self.dest_id.as_deref().is_none_or(|dest| dest == node_id)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;

    fn identity() -> NodeIdentity {
        NodeIdentity::new(
            "node-a",
            "Sandbox",
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4100)),
        )
    }

    #[test]
    fn body_serializes_with_type_tag() {
        let message = Message::new(&identity(), 7, Body::Ping { timestamp: 10 });
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "ping");
        assert_eq!(value["source_id"], "node-a");
        assert_eq!(value["source_host"], "127.0.0.1");
        assert_eq!(value["source_port"], 4100);
        assert_eq!(value["timestamp"], 10);
        assert!(value.get("dest_id").is_none());
    }

    #[test]
    fn exec_mode_uses_pascal_case_on_the_wire() {
        let command = Command {
            connection_id: "c-1".to_string(),
            command_id: 3,
            mode: ExecMode::EvaluateStatement,
            payload: "1 + 2".to_string(),
            unattended: true,
        };
        let value = serde_json::to_value(Body::Command(command)).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["mode"], "EvaluateStatement");
    }

    #[test]
    fn socket_addr_parses_ip_literal() {
        let addr = identity().socket_addr().unwrap();
        assert_eq!(addr.port(), 4100);

        let bad = NodeIdentity {
            host: "not-an-ip".to_string(),
            ..identity()
        };
        assert!(matches!(
            bad.socket_addr(),
            Err(WireError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn addressing_rules() {
        let broadcast = Message::new(&identity(), 1, Body::Ping { timestamp: 0 });
        assert!(broadcast.is_addressed_to("anyone"));

        let direct = broadcast.clone().with_dest("node-b");
        assert!(direct.is_addressed_to("node-b"));
        assert!(!direct.is_addressed_to("node-c"));
    }

    #[test]
    fn output_text_joins_lines() {
        let result = CommandResult {
            connection_id: "c-1".to_string(),
            command_id: 1,
            success: true,
            output: vec![
                OutputEntry::new("Info", "hello"),
                OutputEntry::new("Warning", "careful"),
            ],
            result: None,
            error: None,
        };
        assert_eq!(result.output_text(), "Info: hello\nWarning: careful");
    }

    #[test]
    fn session_bodies_expose_connection_id() {
        let body = Body::Close {
            connection_id: "c-9".to_string(),
        };
        assert_eq!(body.connection_id(), Some("c-9"));
        assert_eq!(body.timestamp(), None);
        assert_eq!(Body::Pong { timestamp: 5 }.connection_id(), None);
    }
}

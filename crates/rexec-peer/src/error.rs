use std::time::Duration;

use crate::connection::ConnectionState;

/// Errors that can occur in discovery, connection, and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] rexec_transport::TransportError),

    /// Outgoing message could not be encoded.
    #[error("wire error: {0}")]
    Wire(#[from] rexec_wire::WireError),

    /// Result pipe error.
    #[error("result pipe error: {0}")]
    Pipe(#[from] rexec_pipe::PipeError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The node did not acknowledge an open request in time.
    #[error("connection to {node} timed out after {elapsed:?}")]
    ConnectionTimeout { node: String, elapsed: Duration },

    /// A command was issued on a connection that is not open.
    #[error("not connected to {node} (connection is {state})")]
    NotConnected {
        node: String,
        state: ConnectionState,
    },

    /// A lifecycle operation was called from the wrong state.
    #[error("invalid connection state: expected {expected}, found {actual}")]
    InvalidState {
        expected: ConnectionState,
        actual: ConnectionState,
    },

    /// No result arrived for a command in time. The remote code may still run.
    #[error("command {command_id} on {node} timed out after {elapsed:?}")]
    CommandTimeout {
        node: String,
        command_id: u64,
        elapsed: Duration,
    },

    /// The node reported a failed execution.
    #[error("command {command_id} failed on {node}: {error}")]
    RemoteExecution {
        node: String,
        command_id: u64,
        error: String,
    },

    /// Discovery found no matching node in time.
    #[error("no node matching {} found after {elapsed:?}", .label.as_deref().unwrap_or("<any>"))]
    NodeNotFound {
        label: Option<String>,
        elapsed: Duration,
    },

    /// The command was rejected before sending.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Open handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;

use std::net::SocketAddr;

/// Errors that can occur in UDP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to join the multicast group.
    #[error("failed to join multicast group {group}: {source}")]
    JoinGroup {
        group: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to send a datagram.
    #[error("failed to send to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to receive a datagram.
    #[error("failed to receive datagram: {0}")]
    Receive(std::io::Error),

    /// An I/O error occurred while configuring the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured address cannot be used for this endpoint.
    #[error("invalid address {addr}: {reason}")]
    InvalidAddress { addr: SocketAddr, reason: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;

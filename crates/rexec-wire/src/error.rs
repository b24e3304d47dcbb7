/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The datagram is not a valid protocol message.
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    /// The encoded message does not fit in one datagram.
    #[error("message too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A node address could not be parsed.
    #[error("invalid node address {host}:{port}")]
    InvalidAddress { host: String, port: u16 },
}

impl WireError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WireError>;

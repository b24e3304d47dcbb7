use bytes::Bytes;

use crate::error::{Result, WireError};
use crate::message::{Body, Message, MAGIC, PROTOCOL_VERSION};

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Encode a message into one datagram payload.
///
/// Wire format: a single UTF-8 JSON object.
/// ```text
/// {"magic":"rexec","version":1,"message_id":12,"source_id":"…",
///  "source_host":"127.0.0.1","source_port":50123,"type":"ping","timestamp":…}
/// ```
pub fn encode(message: &Message) -> Result<Bytes> {
    let bytes = serde_json::to_vec(message).map_err(WireError::Encode)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(WireError::TooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(Bytes::from(bytes))
}

/// Decode one datagram payload.
///
/// Fails with [`WireError::Malformed`] when the payload is not JSON, a
/// required field is missing, the `type` is unknown, or the envelope names
/// another protocol. Unknown extra fields are ignored.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let message: Message =
        serde_json::from_slice(bytes).map_err(|err| WireError::malformed(err.to_string()))?;
    validate(&message)?;
    Ok(message)
}

fn validate(message: &Message) -> Result<()> {
    if message.magic != MAGIC {
        return Err(WireError::malformed(format!(
            "unexpected magic '{}' (expected '{}')",
            message.magic, MAGIC
        )));
    }
    if message.version != PROTOCOL_VERSION {
        return Err(WireError::malformed(format!(
            "unsupported protocol version {} (expected {})",
            message.version, PROTOCOL_VERSION
        )));
    }
    if message.source_id.is_empty() {
        return Err(WireError::malformed("empty source_id"));
    }
    if let Some(connection_id) = message.body.connection_id() {
        if connection_id.is_empty() {
            return Err(WireError::malformed(format!(
                "empty connection_id in {} message",
                message.kind()
            )));
        }
    }
    if let Body::Command(command) = &message.body {
        if command.payload.is_empty() {
            return Err(WireError::malformed("empty command payload"));
        }
    }
    Ok(())
}

//! Message codec for remote execution.
//!
//! Every datagram carries exactly one JSON object with:
//! - a protocol `magic` and `version`
//! - the sender's identity (`source_id`, `source_label`, `source_host`, `source_port`)
//! - a per-sender `message_id` for duplicate suppression
//! - a `type` discriminant selecting the body (beacon, connection control,
//!   command, or command result)
//!
//! Unknown fields are ignored on decode so newer peers can add optional data.

pub mod codec;
pub mod error;
pub mod kind;
pub mod message;
pub mod seen;

pub use codec::{decode, encode, MAX_DATAGRAM_SIZE};
pub use error::{Result, WireError};
pub use kind::MessageKind;
pub use message::{
    Body, Command, CommandResult, ExecMode, Message, NodeIdentity, OutputEntry, MAGIC,
    PROTOCOL_VERSION,
};
pub use seen::RecentIds;

//! UDP transport for remote execution.
//!
//! Two kinds of endpoints are provided:
//! - a group endpoint bound to the well-known discovery port, joined to the
//!   multicast group when the configured group address is a multicast address
//! - a unicast endpoint bound to an ephemeral port, used for pong replies and
//!   for all connection/command traffic
//!
//! This is the lowest layer of rexec. Everything else builds on top of
//! [`UdpEndpoint`].

pub mod config;
pub mod error;
pub mod udp;

mod sockopt;

pub use config::{
    MulticastConfig, DEFAULT_MULTICAST_BIND_ADDRESS, DEFAULT_MULTICAST_GROUP,
    DEFAULT_MULTICAST_TTL, DEFAULT_RECEIVE_BUFFER_SIZE,
};
pub use error::{Result, TransportError};
pub use udp::{Datagram, UdpEndpoint};

//! Remote code execution on scripting nodes.
//!
//! rexec finds nodes that announce themselves on a UDP multicast group,
//! opens a connection to one, and runs code on it. Structured values come
//! back through a result pipe.
//!
//! # Crate Structure
//!
//! - [`transport`]: UDP group and unicast endpoints
//! - [`wire`]: JSON message codec
//! - [`pipe`]: Result pipe sinks and the remote module bootstrap
//! - [`peer`]: Discovery, connections, and command dispatch (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use rexec_transport::*;
}

/// Re-export wire types.
pub mod wire {
    pub use rexec_wire::*;
}

/// Re-export result pipe types.
pub mod pipe {
    pub use rexec_pipe::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use rexec_peer::*;
}

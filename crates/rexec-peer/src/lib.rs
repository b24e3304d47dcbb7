//! Node discovery, connections, and command dispatch for remote execution.
//!
//! This is the layer callers use. Discover nodes on the multicast group,
//! open a connection to one, run code on it, and collect structured values
//! through a result pipe.
//!
//! ```no_run
//! # async fn demo() -> rexec_peer::Result<()> {
//! use std::time::Duration;
//! use rexec_peer::{connect, ExecMode};
//!
//! let conn = connect(Some("Sandbox"), Duration::from_secs(3)).await?;
//! let result = conn.execute(ExecMode::EvaluateStatement, "21 * 2").await?;
//! assert_eq!(result.result.as_deref(), Some("42"));
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod connection;
pub mod connector;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod responder;

mod control;

pub use bridge::{PipeRun, ResultPipeBridge};
pub use config::{
    DiscoveryConfig, LocalNode, SessionConfig, DEFAULT_BROADCAST_INTERVAL,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_DEDUP_WINDOW, DEFAULT_NODE_TTL, DEFAULT_OPEN_TIMEOUT,
};
pub use connection::{Connection, ConnectionState};
pub use connector::{connect, connect_with_config};
pub use discovery::DiscoveryService;
pub use dispatcher::execute;
pub use error::{PeerError, Result};
pub use registry::{NodeEntry, NodeRegistry};
pub use responder::{Execution, Executor, NodeResponder};

pub use rexec_wire::{CommandResult, ExecMode, NodeIdentity, OutputEntry};

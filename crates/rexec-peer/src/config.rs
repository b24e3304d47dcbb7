use std::time::Duration;

use rexec_transport::MulticastConfig;

/// Default interval between discovery pings.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(1);

/// Default silence after which a node is dropped from the registry.
pub const DEFAULT_NODE_TTL: Duration = Duration::from_secs(5);

/// Default number of message identities remembered for duplicate filtering.
pub const DEFAULT_DEDUP_WINDOW: usize = 1024;

/// Default bound on the open handshake.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of this process on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    /// Opaque unique id; a fresh UUID v4 by default.
    pub id: String,
    /// Human-readable label advertised with every message.
    pub label: String,
}

impl LocalNode {
    /// New identity with a random id.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
        }
    }
}

impl Default for LocalNode {
    fn default() -> Self {
        Self::new("")
    }
}

/// Settings for [`DiscoveryService`](crate::DiscoveryService).
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub network: MulticastConfig,
    pub local: LocalNode,
    /// Interval between pings.
    pub broadcast_interval: Duration,
    /// Silence timeout for registry entries.
    pub node_ttl: Duration,
    /// Also listen on the group socket for pings and disconnects from
    /// other nodes. Only applies when the group is a multicast address;
    /// pongs always arrive on the unicast socket.
    pub join_group: bool,
    /// Number of message identities remembered for duplicate filtering.
    pub dedup_window: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            network: MulticastConfig::default(),
            local: LocalNode::default(),
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            node_ttl: DEFAULT_NODE_TTL,
            join_group: true,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

/// Settings for a [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub network: MulticastConfig,
    /// Bound on the open handshake.
    pub open_timeout: Duration,
    /// Timeout used by [`Connection::execute`](crate::Connection::execute).
    pub command_timeout: Duration,
    /// Ask the node to suppress interactive prompts.
    pub unattended: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            network: MulticastConfig::default(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            unattended: true,
        }
    }
}

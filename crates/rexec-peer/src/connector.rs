use std::time::Duration;

use tracing::debug;

use crate::config::{DiscoveryConfig, SessionConfig};
use crate::connection::Connection;
use crate::discovery::DiscoveryService;
use crate::error::Result;

/// Discover a node with default settings and open a connection to it.
///
/// `label` selects the node by label; `None` takes the first node found.
pub async fn connect(label: Option<&str>, wait: Duration) -> Result<Connection> {
    connect_with_config(
        label,
        wait,
        DiscoveryConfig::default(),
        SessionConfig::default(),
    )
    .await
}

/// Discover and connect with explicit configuration.
///
/// Discovery runs only until a node is found. The connection reuses the
/// discovery's local node identity.
pub async fn connect_with_config(
    label: Option<&str>,
    wait: Duration,
    discovery: DiscoveryConfig,
    session: SessionConfig,
) -> Result<Connection> {
    let local = discovery.local.clone();
    let service = DiscoveryService::start(discovery).await?;
    let found = service.wait_for_node(label, wait).await;
    service.stop().await;
    let node = found?;
    debug!(node = %node, "node selected");

    let connection = Connection::new(node, &local, session)?;
    connection.open().await?;
    Ok(connection)
}

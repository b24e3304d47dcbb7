//! Multicast presence discovery.
//!
//! The service pings the group on a fixed interval. Nodes answer with a
//! unicast pong, which lands in the registry. A node that stays silent for
//! longer than the TTL drops out of the next snapshot; a disconnect beacon
//! removes it at once.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rexec_transport::{Datagram, UdpEndpoint};
use rexec_wire::{decode, Body, NodeIdentity};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::control::{reply_addr, resolved_source, send, Origin};
use crate::error::{PeerError, Result};
use crate::registry::NodeRegistry;

const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Running discovery: beacon emission plus listening.
///
/// Dropping the service aborts its tasks and releases its sockets; call
/// [`DiscoveryService::stop`] to also announce the departure.
pub struct DiscoveryService {
    origin: Origin,
    unicast: Arc<UdpEndpoint>,
    group_addr: SocketAddr,
    registry: Arc<Mutex<NodeRegistry>>,
    node_ttl: Duration,
    changes: watch::Receiver<u64>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Context {
    origin: Origin,
    unicast: Arc<UdpEndpoint>,
    registry: Arc<Mutex<NodeRegistry>>,
    changes: watch::Sender<u64>,
}

impl DiscoveryService {
    /// Bind sockets and start emitting and listening.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(config: DiscoveryConfig) -> Result<Self> {
        let unicast = Arc::new(UdpEndpoint::bind_unicast(&config.network)?);
        let group = if config.join_group && config.network.is_multicast() {
            Some(UdpEndpoint::bind_group(&config.network)?)
        } else {
            None
        };

        let origin = Origin::new(&config.local.id, &config.local.label, &unicast);
        let registry = Arc::new(Mutex::new(NodeRegistry::new(
            config.local.id.clone(),
            config.dedup_window,
        )));
        let (changes_tx, changes) = watch::channel(0u64);
        let shutdown = CancellationToken::new();
        let group_addr = config.network.group_addr();

        let context = Arc::new(Context {
            origin: origin.clone(),
            unicast: Arc::clone(&unicast),
            registry: Arc::clone(&registry),
            changes: changes_tx,
        });

        let mut tasks = vec![
            tokio::spawn(emit_loop(
                Arc::clone(&context),
                group_addr,
                config.broadcast_interval,
                shutdown.clone(),
            )),
            tokio::spawn(listen_loop(
                Arc::clone(&context),
                Arc::clone(&unicast),
                shutdown.clone(),
            )),
        ];
        if let Some(group) = group {
            tasks.push(tokio::spawn(listen_loop(
                Arc::clone(&context),
                Arc::new(group),
                shutdown.clone(),
            )));
        }

        info!(
            node = %origin.identity(),
            group = %group_addr,
            interval = ?config.broadcast_interval,
            ttl = ?config.node_ttl,
            "discovery started"
        );

        Ok(Self {
            origin,
            unicast,
            group_addr,
            registry,
            node_ttl: config.node_ttl,
            changes,
            shutdown,
            tasks,
        })
    }

    /// Live nodes, sorted by id. Never suspends.
    pub fn list_nodes(&self) -> Vec<NodeIdentity> {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        registry.snapshot(Instant::now(), self.node_ttl)
    }

    /// Wait until a live node with `label` is known (any node when `None`).
    pub async fn wait_for_node(
        &self,
        label: Option<&str>,
        timeout: Duration,
    ) -> Result<NodeIdentity> {
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;
        let mut changes = self.changes.clone();

        loop {
            changes.borrow_and_update();
            if let Some(node) = self
                .list_nodes()
                .into_iter()
                .find(|node| label.is_none_or(|label| node.label == label))
            {
                return Ok(node);
            }

            let not_found = || PeerError::NodeNotFound {
                label: label.map(str::to_string),
                elapsed: started.elapsed(),
            };
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Err(not_found()),
            }
        }
    }

    /// This process's identity as advertised to nodes.
    pub fn local_identity(&self) -> &NodeIdentity {
        self.origin.identity()
    }

    /// Group address pings are sent to.
    pub fn group_addr(&self) -> SocketAddr {
        self.group_addr
    }

    /// Stop emitting and listening, announce the departure, and release
    /// the sockets.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Err(err) = send(&self.unicast, &self.origin.disconnect(), self.group_addr).await {
            debug!(error = %err, "disconnect beacon not sent");
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(node = %self.origin.identity(), "discovery stopped");
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for DiscoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryService")
            .field("local", self.origin.identity())
            .field("group_addr", &self.group_addr)
            .field("node_ttl", &self.node_ttl)
            .finish()
    }
}

async fn emit_loop(
    context: Arc<Context>,
    group_addr: SocketAddr,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let ping = context.origin.ping();
                match send(&context.unicast, &ping, group_addr).await {
                    Ok(()) => trace!(group = %group_addr, message_id = ping.message_id, "ping sent"),
                    Err(err) => warn!(group = %group_addr, error = %err, "ping failed; retrying next tick"),
                }
            }
        }
    }
}

async fn listen_loop(context: Arc<Context>, endpoint: Arc<UdpEndpoint>, shutdown: CancellationToken) {
    loop {
        let datagram = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = endpoint.recv() => match received {
                Ok(datagram) => datagram,
                Err(err) => {
                    warn!(addr = %endpoint.local_addr(), error = %err, "discovery receive failed");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };
        handle_datagram(&context, datagram).await;
    }
}

async fn handle_datagram(context: &Context, datagram: Datagram) {
    let message = match decode(&datagram.payload) {
        Ok(message) => message,
        Err(err) => {
            debug!(from = %datagram.from, error = %err, "dropping malformed datagram");
            return;
        }
    };

    {
        let mut registry = context
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !registry.observe(&message) {
            return;
        }
        match &message.body {
            Body::Pong { .. } => match resolved_source(&message, datagram.from) {
                Ok(identity) => {
                    registry.upsert(identity, Instant::now());
                    context.changes.send_modify(|version| *version += 1);
                }
                Err(err) => debug!(from = %datagram.from, error = %err, "pong with bad address"),
            },
            Body::Disconnect { .. } => {
                if registry.evict(&message.source_id).is_some() {
                    context.changes.send_modify(|version| *version += 1);
                }
            }
            Body::Ping { .. } => {}
            other => {
                trace!(kind = %other.kind(), from = %datagram.from, "ignoring session message");
                return;
            }
        }
    }

    if let Body::Ping { .. } = message.body {
        let result = match reply_addr(&message, datagram.from) {
            Ok(to) => send(&context.unicast, &context.origin.pong(&message.source_id), to).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(node = %message.source_id, error = %err, "pong failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use rexec_transport::MulticastConfig;
    use rexec_wire::{encode, Message};

    use super::*;
    use crate::config::LocalNode;

    fn loopback_discovery(group: SocketAddr) -> DiscoveryConfig {
        let group = match group {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => unreachable!("loopback tests use IPv4"),
        };
        DiscoveryConfig {
            network: MulticastConfig::loopback(group),
            local: LocalNode::new("caller"),
            broadcast_interval: Duration::from_millis(50),
            node_ttl: Duration::from_millis(400),
            ..DiscoveryConfig::default()
        }
    }

    fn fake_group() -> (std::net::UdpSocket, SocketAddr) {
        let socket = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[tokio::test]
    async fn pings_reach_the_group_address() {
        let (group, group_addr) = fake_group();
        group
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let service = DiscoveryService::start(loopback_discovery(group_addr))
            .await
            .unwrap();

        let received = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 2048];
            let (len, _) = group.recv_from(&mut buf).unwrap();
            decode(&buf[..len]).unwrap()
        })
        .await
        .unwrap();

        assert!(matches!(received.body, Body::Ping { .. }));
        assert_eq!(received.source_id, service.local_identity().id);
        assert_eq!(received.source_label, "caller");
        service.stop().await;
    }

    #[tokio::test]
    async fn pong_registers_node_and_disconnect_evicts_it() {
        let (_group, group_addr) = fake_group();
        let service = DiscoveryService::start(loopback_discovery(group_addr))
            .await
            .unwrap();
        let target = service.local_identity().socket_addr().unwrap();

        let node_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let node = NodeIdentity::new("node-1", "Sandbox", node_socket.local_addr().unwrap());

        let pong = Message::new(&node, 1, Body::Pong { timestamp: 1 })
            .with_dest(service.local_identity().id.clone());
        let bytes = encode(&pong).unwrap();
        node_socket.send_to(&bytes, target).unwrap();
        node_socket.send_to(&bytes, target).unwrap();

        let found = service
            .wait_for_node(Some("Sandbox"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(found.id, "node-1");
        assert_eq!(service.list_nodes().len(), 1);

        let bye = Message::new(&node, 2, Body::Disconnect { timestamp: 2 });
        node_socket.send_to(&encode(&bye).unwrap(), target).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !service.list_nodes().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(service.list_nodes().is_empty());
        service.stop().await;
    }

    #[tokio::test]
    async fn wait_for_node_times_out() {
        let (_group, group_addr) = fake_group();
        let service = DiscoveryService::start(loopback_discovery(group_addr))
            .await
            .unwrap();

        let started = Instant::now();
        let err = service
            .wait_for_node(Some("Nowhere"), Duration::from_millis(150))
            .await
            .unwrap_err();

        assert!(matches!(err, PeerError::NodeNotFound { .. }));
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn garbage_does_not_stop_listening() {
        let (_group, group_addr) = fake_group();
        let service = DiscoveryService::start(loopback_discovery(group_addr))
            .await
            .unwrap();
        let target = service.local_identity().socket_addr().unwrap();

        let node_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        node_socket.send_to(b"{\"not\":\"rexec\"}", target).unwrap();
        node_socket.send_to(b"\x00\x01", target).unwrap();

        let node = NodeIdentity::new("node-2", "", node_socket.local_addr().unwrap());
        let pong = Message::new(&node, 1, Body::Pong { timestamp: 1 });
        node_socket.send_to(&encode(&pong).unwrap(), target).unwrap();

        let found = service
            .wait_for_node(None, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(found.id, "node-2");
    }
}

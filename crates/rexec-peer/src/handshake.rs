//! Connection open handshake.
//!
//! The caller sends `open` with a fresh connection id and waits. Any message
//! from the target node carrying that connection id completes the handshake;
//! nodes normally answer with an `open` of their own. The open request is
//! sent once and never retried.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rexec_transport::UdpEndpoint;
use rexec_wire::NodeIdentity;
use tokio::sync::watch;
use tracing::debug;

use crate::control::{send, Origin};
use crate::error::{PeerError, Result};

const MAX_CONNECTION_ID_LEN: usize = 128;

/// A fresh connection identity.
pub fn new_connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Check a connection id received from or sent to a peer.
pub fn validate_connection_id(connection_id: &str) -> Result<()> {
    if connection_id.is_empty() || connection_id.len() > MAX_CONNECTION_ID_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid connection_id length: {}",
            connection_id.len()
        )));
    }
    if connection_id.chars().any(char::is_control) {
        return Err(PeerError::HandshakeFailed(
            "connection_id contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Parameters of one open attempt.
pub(crate) struct OpenRequest<'a> {
    pub(crate) endpoint: &'a UdpEndpoint,
    pub(crate) origin: &'a Origin,
    pub(crate) remote: &'a NodeIdentity,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) connection_id: &'a str,
    pub(crate) timeout: Duration,
}

/// Send `open` and wait until `acks` turns true.
///
/// `acks` must be subscribed before the call so an early acknowledgement is
/// not missed. Returns the handshake latency.
pub(crate) async fn open_handshake(
    request: OpenRequest<'_>,
    mut acks: watch::Receiver<bool>,
) -> Result<Duration> {
    validate_connection_id(request.connection_id)?;
    let started = Instant::now();

    let open = request
        .origin
        .open(request.connection_id, &request.remote.id);
    send(request.endpoint, &open, request.remote_addr).await?;
    debug!(
        node = %request.remote,
        connection_id = request.connection_id,
        "open sent"
    );

    let acked = tokio::time::timeout(request.timeout, acks.wait_for(|acked| *acked))
        .await
        .map(|waited| waited.is_ok());
    match acked {
        Ok(true) => Ok(started.elapsed()),
        Ok(false) => Err(PeerError::HandshakeFailed(
            "receive path closed during open".to_string(),
        )),
        Err(_) => Err(PeerError::ConnectionTimeout {
            node: request.remote.to_string(),
            elapsed: started.elapsed(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use rexec_transport::MulticastConfig;

    use super::*;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = new_connection_id();
        let b = new_connection_id();
        assert_ne!(a, b);
        assert!(validate_connection_id(&a).is_ok());
    }

    #[test]
    fn rejects_bad_connection_ids() {
        assert!(validate_connection_id("").is_err());
        assert!(validate_connection_id(&"x".repeat(129)).is_err());
        assert!(validate_connection_id("bad\nid").is_err());
        assert!(validate_connection_id("conn-1").is_ok());
    }

    fn loopback_endpoint() -> UdpEndpoint {
        let config = MulticastConfig::loopback("127.0.0.1:0".parse().unwrap());
        UdpEndpoint::bind_unicast(&config).unwrap()
    }

    #[tokio::test]
    async fn completes_when_ack_arrives() {
        let endpoint = loopback_endpoint();
        let origin = Origin::new("caller", "", &endpoint);
        let node_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        node_socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let remote = NodeIdentity::new("node", "", node_socket.local_addr().unwrap());
        let (acks_tx, acks) = watch::channel(false);

        let acker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            acks_tx.send_replace(true);
            acks_tx
        });

        let latency = open_handshake(
            OpenRequest {
                endpoint: &endpoint,
                origin: &origin,
                remote: &remote,
                remote_addr: node_socket.local_addr().unwrap(),
                connection_id: "conn-1",
                timeout: Duration::from_secs(2),
            },
            acks,
        )
        .await
        .unwrap();
        assert!(latency < Duration::from_secs(2));
        drop(acker.await.unwrap());

        let mut buf = [0u8; 2048];
        let (len, _) = node_socket.recv_from(&mut buf).unwrap();
        let open = rexec_wire::decode(&buf[..len]).unwrap();
        assert_eq!(open.body.connection_id(), Some("conn-1"));
        assert_eq!(open.dest_id.as_deref(), Some("node"));
    }

    #[tokio::test]
    async fn times_out_without_ack() {
        let endpoint = loopback_endpoint();
        let origin = Origin::new("caller", "", &endpoint);
        let node_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let remote = NodeIdentity::new("node", "", node_socket.local_addr().unwrap());
        let (_acks_tx, acks) = watch::channel(false);

        let err = open_handshake(
            OpenRequest {
                endpoint: &endpoint,
                origin: &origin,
                remote: &remote,
                remote_addr: node_socket.local_addr().unwrap(),
                connection_id: "conn-2",
                timeout: Duration::from_millis(100),
            },
            acks,
        )
        .await
        .unwrap_err();

        match err {
            PeerError::ConnectionTimeout { node, elapsed } => {
                assert!(node.contains("node"));
                assert!(elapsed >= Duration::from_millis(100));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

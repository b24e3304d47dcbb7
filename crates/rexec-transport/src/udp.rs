use std::net::{IpAddr, SocketAddr};

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::config::MulticastConfig;
use crate::error::{Result, TransportError};
use crate::sockopt::bind_reusable;

/// A received datagram and the address it came from.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Bytes,
    pub from: SocketAddr,
}

/// A bound UDP socket registered with the Tokio reactor.
///
/// Constructors must be called from within a Tokio runtime.
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    advertised_addr: SocketAddr,
    receive_buffer_size: usize,
}

impl UdpEndpoint {
    /// Bind the discovery group socket.
    ///
    /// The socket is bound with `SO_REUSEADDR` so several processes on one
    /// host can listen on the same group port. When the configured group is a
    /// multicast address the socket joins it on `bind_address`.
    pub fn bind_group(config: &MulticastConfig) -> Result<Self> {
        let bind_addr = config.group_bind_addr();
        let std_socket = bind_reusable(bind_addr).map_err(|source| TransportError::Bind {
            addr: SocketAddr::V4(bind_addr),
            source,
        })?;

        if config.is_multicast() {
            std_socket
                .join_multicast_v4(config.group.ip(), &config.bind_address)
                .map_err(|source| TransportError::JoinGroup {
                    group: config.group_addr(),
                    source,
                })?;
            std_socket.set_multicast_loop_v4(config.loopback)?;
            info!(group = %config.group, interface = %config.bind_address, "joined multicast group");
        } else {
            debug!(addr = %bind_addr, "group address is not multicast; bound directly");
        }

        Self::from_std(std_socket, config)
    }

    /// Bind a unicast socket on `config.unicast_bind`.
    ///
    /// Multicast TTL and loopback are applied so the endpoint can also emit
    /// datagrams to the group.
    pub fn bind_unicast(config: &MulticastConfig) -> Result<Self> {
        let std_socket = std::net::UdpSocket::bind(config.unicast_bind).map_err(|source| {
            TransportError::Bind {
                addr: config.unicast_bind,
                source,
            }
        })?;

        if config.unicast_bind.is_ipv4() {
            std_socket.set_multicast_ttl_v4(config.ttl)?;
            std_socket.set_multicast_loop_v4(config.loopback)?;
        }

        let endpoint = Self::from_std(std_socket, config)?;
        debug!(addr = %endpoint.local_addr, "bound unicast endpoint");
        Ok(endpoint)
    }

    fn from_std(std_socket: std::net::UdpSocket, config: &MulticastConfig) -> Result<Self> {
        std_socket.set_nonblocking(true)?;
        let local_addr = std_socket.local_addr()?;
        let socket = UdpSocket::from_std(std_socket)?;
        let advertised_addr = match config.advertise_host {
            Some(host) => SocketAddr::new(host, local_addr.port()),
            None => local_addr,
        };

        Ok(Self {
            socket,
            local_addr,
            advertised_addr,
            receive_buffer_size: config.receive_buffer_size,
        })
    }

    /// Send one datagram.
    pub async fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket
            .send_to(payload, addr)
            .await
            .map_err(|source| TransportError::Send { addr, source })?;
        Ok(())
    }

    /// Send one datagram without waiting for socket readiness.
    ///
    /// Usable from `Drop` implementations; fails with `WouldBlock` when the
    /// send buffer is full.
    pub fn try_send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket
            .try_send_to(payload, addr)
            .map_err(|source| TransportError::Send { addr, source })?;
        Ok(())
    }

    /// Receive the next datagram.
    pub async fn recv(&self) -> Result<Datagram> {
        let mut buf = BytesMut::zeroed(self.receive_buffer_size);
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(TransportError::Receive)?;
        buf.truncate(len);
        Ok(Datagram {
            payload: buf.freeze(),
            from,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address remote nodes should reply to.
    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised_addr
    }

    /// Whether the advertised host is a wildcard address that a remote node
    /// cannot reply to.
    pub fn advertises_unspecified(&self) -> bool {
        match self.advertised_addr.ip() {
            IpAddr::V4(ip) => ip.is_unspecified(),
            IpAddr::V6(ip) => ip.is_unspecified(),
        }
    }
}

impl std::fmt::Debug for UdpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpEndpoint")
            .field("local_addr", &self.local_addr)
            .field("advertised_addr", &self.advertised_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Duration;

    use super::*;

    fn loopback_config() -> MulticastConfig {
        MulticastConfig::loopback(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    #[tokio::test]
    async fn unicast_send_and_receive() {
        let config = loopback_config();
        let a = UdpEndpoint::bind_unicast(&config).unwrap();
        let b = UdpEndpoint::bind_unicast(&config).unwrap();

        a.send_to(b"hello", b.local_addr()).await.unwrap();
        let datagram = tokio::time::timeout(Duration::from_secs(2), b.recv())
            .await
            .expect("datagram should arrive")
            .unwrap();

        assert_eq!(datagram.payload.as_ref(), b"hello");
        assert_eq!(datagram.from, a.local_addr());
    }

    #[tokio::test]
    async fn non_multicast_group_is_bound_directly() {
        let config = loopback_config();
        let group = UdpEndpoint::bind_group(&config).unwrap();
        let sender = UdpEndpoint::bind_unicast(&config).unwrap();
        assert_eq!(group.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        sender.send_to(b"ping", group.local_addr()).await.unwrap();
        let datagram = tokio::time::timeout(Duration::from_secs(2), group.recv())
            .await
            .expect("datagram should arrive")
            .unwrap();
        assert_eq!(datagram.payload.as_ref(), b"ping");
    }

    #[tokio::test]
    async fn advertised_host_overrides_bind_host() {
        let config = MulticastConfig {
            advertise_host: Some(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))),
            ..loopback_config()
        };
        let endpoint = UdpEndpoint::bind_unicast(&config).unwrap();

        assert_eq!(
            endpoint.advertised_addr().ip(),
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))
        );
        assert_eq!(
            endpoint.advertised_addr().port(),
            endpoint.local_addr().port()
        );
        assert!(!endpoint.advertises_unspecified());
    }

    #[tokio::test]
    async fn wildcard_bind_advertises_unspecified() {
        let endpoint = UdpEndpoint::bind_unicast(&MulticastConfig::default()).unwrap();
        assert!(endpoint.advertises_unspecified());
    }

    #[tokio::test]
    async fn datagram_is_truncated_to_received_length() {
        let config = MulticastConfig {
            receive_buffer_size: 16,
            ..loopback_config()
        };
        let a = UdpEndpoint::bind_unicast(&config).unwrap();
        let b = UdpEndpoint::bind_unicast(&config).unwrap();

        a.try_send_to(b"abc", b.local_addr()).unwrap();
        let datagram = tokio::time::timeout(Duration::from_secs(2), b.recv())
            .await
            .expect("datagram should arrive")
            .unwrap();
        assert_eq!(datagram.payload.len(), 3);
    }
}

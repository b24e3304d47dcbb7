use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

/// Default discovery group: `239.0.0.1:6766`.
pub const DEFAULT_MULTICAST_GROUP: SocketAddrV4 =
    SocketAddrV4::new(Ipv4Addr::new(239, 0, 0, 1), 6766);

/// Default interface address used to join the group.
pub const DEFAULT_MULTICAST_BIND_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Default multicast TTL. Zero keeps datagrams on the local host.
pub const DEFAULT_MULTICAST_TTL: u32 = 0;

/// Default receive buffer size, large enough for any UDP payload.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Network settings shared by discovery, sessions, and responders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastConfig {
    /// Discovery group address. A non-multicast address is bound directly
    /// without a group join (useful on hosts without multicast routing).
    pub group: SocketAddrV4,
    /// Interface address for the group socket and the multicast join.
    pub bind_address: Ipv4Addr,
    /// Multicast TTL applied to outgoing group datagrams.
    pub ttl: u32,
    /// Whether group datagrams loop back to sockets on this host.
    pub loopback: bool,
    /// Bind address for unicast endpoints. Port 0 picks an ephemeral port.
    pub unicast_bind: SocketAddr,
    /// Host advertised to remote nodes as the reply address.
    /// `None` advertises the unicast bind address.
    pub advertise_host: Option<IpAddr>,
    /// Size of the per-endpoint receive buffer.
    pub receive_buffer_size: usize,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            bind_address: DEFAULT_MULTICAST_BIND_ADDRESS,
            ttl: DEFAULT_MULTICAST_TTL,
            loopback: true,
            unicast_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            advertise_host: None,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
        }
    }
}

impl MulticastConfig {
    /// Configuration that keeps all traffic on the loopback interface.
    ///
    /// `group` may be a plain loopback address; it is then bound directly.
    pub fn loopback(group: SocketAddrV4) -> Self {
        Self {
            group,
            bind_address: Ipv4Addr::LOCALHOST,
            unicast_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            ..Self::default()
        }
    }

    /// Whether the group address requires a multicast join.
    pub fn is_multicast(&self) -> bool {
        self.group.ip().is_multicast()
    }

    /// Group address as a generic socket address.
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.group)
    }

    /// Address a group endpoint binds to.
    ///
    /// Multicast groups bind the interface address on the group port;
    /// other addresses are bound as-is.
    pub fn group_bind_addr(&self) -> SocketAddrV4 {
        if self.is_multicast() {
            SocketAddrV4::new(self.bind_address, self.group.port())
        } else {
            self.group
        }
    }
}

use std::net::{SocketAddrV4, UdpSocket};

/// Bind a UDP socket with `SO_REUSEADDR` set before the bind, so several
/// processes on one host can share the discovery port.
#[cfg(unix)]
pub(crate) fn bind_reusable(addr: SocketAddrV4) -> std::io::Result<UdpSocket> {
    use std::os::fd::FromRawFd;

    // SAFETY: plain socket(2) call with constant arguments; the result is checked below.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `fd` is a freshly created, open descriptor owned by nobody else.
    // Wrapping it immediately closes it on every early return below.
    let socket = unsafe { UdpSocket::from_raw_fd(fd) };

    let enable: libc::c_int = 1;
    // SAFETY: `enable` is a valid c_int living for the duration of the call and
    // the length matches its size.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            (&enable as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: sockaddr_in is plain old data; all-zero is a valid starting value
    // (and covers the BSD `sin_len`/`sin_zero` fields).
    let mut sockaddr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
    sockaddr.sin_port = addr.port().to_be();
    sockaddr.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };

    // SAFETY: `sockaddr` is a fully initialized sockaddr_in and the length passed
    // matches its size.
    let rc = unsafe {
        libc::bind(
            fd,
            (&sockaddr as *const libc::sockaddr_in).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(socket)
}

#[cfg(not(unix))]
pub(crate) fn bind_reusable(addr: SocketAddrV4) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(addr)
}

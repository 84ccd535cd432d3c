//! Interface binding: one TCP listener and one UDP socket on a shared port.
//!
//! Resolution is numeric-only. Every socket created during a failed attempt
//! is an owned [`Socket`], so an early return closes it.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::trace;

use crate::error::{NetError, Result, SocketKind};
use crate::options::ManagerOptions;

/// One successfully bound address: a stream listener and a datagram socket
/// sharing the manager's port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    address: String,
    port: String,
    local_addr: SocketAddr,
    tcp_fd: RawFd,
    udp_fd: RawFd,
}

impl Interface {
    /// Address string the interface was bound with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Port string shared by every interface of the manager.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Socket address both sockets are bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Descriptor of the stream listener.
    pub fn tcp_fd(&self) -> RawFd {
        self.tcp_fd
    }

    /// Descriptor of the datagram socket.
    pub fn udp_fd(&self) -> RawFd {
        self.udp_fd
    }

    /// True for IPv6 interfaces.
    pub fn is_ipv6(&self) -> bool {
        self.local_addr.is_ipv6()
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (tcp fd {}, udp fd {})", self.local_addr, self.tcp_fd, self.udp_fd)
    }
}

/// The sockets produced by a successful bind, before the manager takes
/// ownership of them.
#[derive(Debug)]
pub(crate) struct BoundPair {
    pub(crate) interface: Interface,
    pub(crate) listener: Socket,
    pub(crate) datagram: Socket,
}

/// Resolve `address` and `port` without consulting DNS.
///
/// Accepts IPv4 literals, IPv6 literals, and IPv6 literals carrying a
/// numeric zone index (`fe80::1%2`). The port must be a decimal number.
///
/// # Examples
///
/// ```
/// use netmux_core::binder::resolve;
///
/// let addr = resolve("::1", "5154").unwrap();
/// assert!(addr.is_ipv6());
/// assert!(resolve("localhost", "5154").is_err());
/// ```
pub fn resolve(address: &str, port: &str) -> Result<SocketAddr> {
    let port_number: u16 = port
        .parse()
        .map_err(|_| NetError::resolution(address, port, "port is not a decimal number"))?;

    if let Some((host, zone)) = address.split_once('%') {
        let ip: Ipv6Addr = host.parse().map_err(|_| {
            NetError::resolution(address, port, "zone index on a non-IPv6 address")
        })?;
        let scope_id: u32 = zone
            .parse()
            .map_err(|_| NetError::resolution(address, port, "zone index is not numeric"))?;
        return Ok(SocketAddr::V6(SocketAddrV6::new(ip, port_number, 0, scope_id)));
    }

    let ip: IpAddr = address
        .parse()
        .map_err(|_| NetError::resolution(address, port, "not a numeric host address"))?;
    Ok(SocketAddr::new(ip, port_number))
}

/// Create, configure and bind the listener/datagram pair for one interface.
pub(crate) fn bind_interface(
    address: &str,
    port: &str,
    options: &ManagerOptions,
) -> Result<BoundPair> {
    let addr = resolve(address, port)?;
    let domain = Domain::for_address(addr);

    let listener = open_listener(addr, domain, options)?;

    // Port "0" lets the kernel pick; the datagram socket follows the listener.
    let local_addr = listener
        .local_addr()
        .ok()
        .and_then(|bound| bound.as_socket())
        .unwrap_or(addr);
    let datagram = open_datagram(local_addr, domain, options)?;

    let interface = Interface {
        address: address.to_string(),
        port: port.to_string(),
        local_addr,
        tcp_fd: listener.as_raw_fd(),
        udp_fd: datagram.as_raw_fd(),
    };
    trace!(%interface, "interface sockets ready");

    Ok(BoundPair {
        interface,
        listener,
        datagram,
    })
}

fn open_listener(addr: SocketAddr, domain: Domain, options: &ManagerOptions) -> Result<Socket> {
    let kind = SocketKind::Tcp;
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| NetError::SocketCreateFailed { kind, source })?;

    #[cfg(unix)]
    if options.reuse_address {
        socket
            .set_reuse_address(true)
            .map_err(|source| option_failed(kind, "SO_REUSEADDR", source))?;
    }

    restrict_to_v6(&socket, addr, kind)?;

    socket
        .bind(&addr.into())
        .map_err(|source| NetError::BindFailed { kind, addr, source })?;

    socket
        .listen(options.listen_backlog)
        .map_err(|source| NetError::ListenFailed { addr, source })?;

    socket
        .set_nonblocking(true)
        .map_err(|source| option_failed(kind, "O_NONBLOCK", source))?;

    Ok(socket)
}

fn open_datagram(addr: SocketAddr, domain: Domain, options: &ManagerOptions) -> Result<Socket> {
    let kind = SocketKind::Udp;
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|source| NetError::SocketCreateFailed { kind, source })?;

    socket
        .set_send_buffer_size(options.udp_buffer_size)
        .map_err(|source| option_failed(kind, "SO_SNDBUF", source))?;
    socket
        .set_recv_buffer_size(options.udp_buffer_size)
        .map_err(|source| option_failed(kind, "SO_RCVBUF", source))?;

    restrict_to_v6(&socket, addr, kind)?;

    socket
        .bind(&addr.into())
        .map_err(|source| NetError::BindFailed { kind, addr, source })?;

    socket
        .set_nonblocking(true)
        .map_err(|source| option_failed(kind, "O_NONBLOCK", source))?;

    Ok(socket)
}

// IPv6 sockets never accept IPv4-mapped traffic, so "::" and "0.0.0.0" can
// share a port.
fn restrict_to_v6(socket: &Socket, addr: SocketAddr, kind: SocketKind) -> Result<()> {
    if addr.is_ipv6() {
        socket
            .set_only_v6(true)
            .map_err(|source| option_failed(kind, "IPV6_V6ONLY", source))?;
    }
    Ok(())
}

fn option_failed(kind: SocketKind, option: &'static str, source: std::io::Error) -> NetError {
    NetError::SocketOptionFailed {
        kind,
        option,
        source,
    }
}

//! The connection manager: bound interfaces, the descriptor table, and the
//! readiness loop that dispatches to registered callbacks.
//!
//! # Table layout
//!
//! The first `2 * num_interfaces()` entries are listeners, one
//! `(TCP, UDP)` pair per successful [`NetManager::bind`] in call order.
//! Every later entry is an accepted client connection.
//!
//! # Driving the loop
//!
//! ```no_run
//! use netmux_core::prelude::*;
//!
//! let mut manager = NetManager::new("5154");
//! for address in ["0.0.0.0", "::"] {
//!     if let Err(err) = manager.bind(address) {
//!         eprintln!("failed to bind {address}: {err}");
//!     }
//! }
//! manager.add_accept_callback(|peer: std::net::SocketAddr, fd: std::os::fd::RawFd| {
//!     println!("{peer} connected on descriptor {fd}");
//! });
//! manager.set_message_callback(|payload: &[u8]| println!("{} bytes", payload.len()));
//!
//! let token = CancelToken::new();
//! manager.run(&token)?;
//! # Ok::<(), NetError>(())
//! ```

use std::io::{self, Read};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::Instant;

use socket2::Socket;
use tracing::{debug, info, trace, warn};

use crate::binder::{bind_interface, Interface};
use crate::callbacks::{CallbackRegistry, OnAccept, OnMessage};
use crate::cancel::CancelToken;
use crate::error::{NetError, Result};
use crate::monitor::{create_monitor, EventMonitor, EventSender, ManagerEvent};
use crate::options::ManagerOptions;
use crate::sys;
use crate::table::{DescriptorTable, Interest, WatchedDescriptor};

/// What servicing a ready client left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Open,
    Evicted,
}

/// Ready entries seen by one poll, and how many were datagram sockets.
#[derive(Debug, Clone, Copy, Default)]
struct Cycle {
    ready: usize,
    datagrams: usize,
}

impl Cycle {
    fn only_datagrams(self) -> bool {
        self.ready > 0 && self.datagrams == self.ready
    }
}

/// Single-threaded socket multiplexer.
pub struct NetManager {
    port: String,
    options: ManagerOptions,
    interfaces: Vec<Interface>,
    table: DescriptorTable<Socket>,
    callbacks: CallbackRegistry,
    read_buf: Vec<u8>,
    events: Option<EventSender>,
}

impl NetManager {
    /// Create a manager that binds every interface on `port`.
    pub fn new(port: impl Into<String>) -> Self {
        Self::with_options(port, ManagerOptions::default())
    }

    /// Create a manager with explicit options.
    pub fn with_options(port: impl Into<String>, options: ManagerOptions) -> Self {
        Self {
            port: port.into(),
            table: DescriptorTable::new(options.initial_capacity, options.table_growth),
            read_buf: vec![0; options.read_buffer_size.max(1)],
            options,
            interfaces: Vec::new(),
            callbacks: CallbackRegistry::new(),
            events: None,
        }
    }

    /// Bind a TCP listener and a UDP socket for `address` on the manager's
    /// port and start watching both.
    ///
    /// A failure leaves the manager exactly as it was; other interfaces are
    /// unaffected and the caller may keep binding.
    pub fn bind(&mut self, address: &str) -> Result<&Interface> {
        match self.try_bind(address) {
            Ok(index) => {
                let local = self.interfaces[index].local_addr();
                info!(address, %local, "listening");
                self.emit(ManagerEvent::Bound {
                    address: address.to_string(),
                    local,
                });
                Ok(&self.interfaces[index])
            }
            Err(err) => {
                warn!(address, port = %self.port, error = %err, "bind failed");
                self.emit(ManagerEvent::BindFailed {
                    address: address.to_string(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn try_bind(&mut self, address: &str) -> Result<usize> {
        let pair = bind_interface(address, &self.port, &self.options)?;
        let slot = 2 * self.interfaces.len();

        let tcp_index = self.table.append(pair.listener, Interest::READ)?;
        let udp_index = match self.table.append(pair.datagram, Interest::READ) {
            Ok(index) => index,
            Err(err) => {
                drop(self.table.remove_at(tcp_index));
                return Err(err);
            }
        };

        // Clients already connected: move the pair in front of them.
        if tcp_index != slot {
            self.table.swap(slot, tcp_index);
            self.table.swap(slot + 1, udp_index);
        }

        self.interfaces.push(pair.interface);
        Ok(self.interfaces.len() - 1)
    }

    /// Run one bounded readiness poll and service every ready descriptor.
    ///
    /// Accept and read failures close the offending descriptor (or skip the
    /// listener) and never abort the cycle. `Err` is returned only for a
    /// failed poll or a failed table growth.
    pub fn process(&mut self) -> Result<()> {
        self.cycle().map(|_| ())
    }

    fn cycle(&mut self) -> Result<Cycle> {
        let ready =
            sys::poll(self.table.pollfds_mut(), self.options.poll_timeout).map_err(NetError::PollFailed)?;
        let mut cycle = Cycle { ready, datagrams: 0 };
        if ready == 0 {
            return Ok(cycle);
        }
        trace!(ready, watched = self.table.len(), "poll cycle");

        let listeners = self.listener_count();
        let mut index = 0;
        while index < self.table.len() {
            let readiness = self.table.readiness(index);
            if readiness.is_empty() {
                index += 1;
                continue;
            }

            if index < listeners {
                if readiness.is_invalid() {
                    warn!(fd = ?self.table.fd(index), "listener descriptor reported invalid");
                } else if index % 2 == 0 {
                    self.accept_one(index)?;
                } else {
                    trace!(fd = ?self.table.fd(index), "datagram socket readable");
                    cycle.datagrams += 1;
                }
                index += 1;
                continue;
            }

            let state = if readiness.is_invalid() {
                self.evict(index);
                ClientState::Evicted
            } else if readiness.is_readable() {
                self.service_client(index)
            } else {
                ClientState::Open
            };

            // An eviction moved the last entry into `index`; look at it next.
            if state == ClientState::Open {
                index += 1;
            }
        }

        Ok(cycle)
    }

    /// Call [`process`](Self::process) until `token` is cancelled.
    ///
    /// Same as [`run_with`](Self::run_with) with a hook that does nothing.
    pub fn run(&mut self, token: &CancelToken) -> Result<()> {
        self.run_with(token, |_: &mut NetManager| Ok(()))
    }

    /// Call [`process`](Self::process) until `token` is cancelled, handing
    /// the manager to `each_cycle` after every cycle.
    ///
    /// The hook is where datagrams get read (see [`udp_socket`](Self::udp_socket)).
    /// Datagram readiness stays set until someone reads, so a cycle that
    /// saw nothing but datagram readiness is padded out to the poll timeout.
    /// The token is checked before every cycle; a fatal error or an `Err`
    /// from the hook stops the loop and is returned.
    pub fn run_with<F>(&mut self, token: &CancelToken, mut each_cycle: F) -> Result<()>
    where
        F: FnMut(&mut NetManager) -> Result<()>,
    {
        debug!(interfaces = self.interfaces.len(), "entering poll loop");
        while !token.is_cancelled() {
            let started = Instant::now();
            let cycle = self.cycle()?;
            each_cycle(self)?;

            if cycle.only_datagrams() {
                if let Some(rest) = self.options.poll_timeout.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
        }
        debug!("poll loop cancelled");
        Ok(())
    }

    fn accept_one(&mut self, index: usize) -> Result<()> {
        let Some(listener) = self.table.get(index) else {
            return Ok(());
        };
        let listener_fd = listener.as_raw_fd();

        let (client, peer) = match accept_client(listener) {
            Ok(Some(accepted)) => accepted,
            Ok(None) => return Ok(()),
            Err(source) => {
                let err = NetError::AcceptFailed {
                    listener: listener_fd,
                    source,
                };
                warn!(error = %err, "accept failed");
                self.emit(ManagerEvent::AcceptFailed {
                    listener: listener_fd,
                    reason: err.to_string(),
                });
                return Ok(());
            }
        };

        let fd = client.as_raw_fd();
        self.table.append(client, Interest::READ)?;
        debug!(%peer, fd, watched = self.table.len(), "accepted connection");

        self.callbacks.notify_accept(peer, fd);
        self.emit(ManagerEvent::Accepted { peer, fd });
        Ok(())
    }

    fn service_client(&mut self, index: usize) -> ClientState {
        let Some(mut socket) = self.table.get(index) else {
            return ClientState::Open;
        };
        let fd = socket.as_raw_fd();

        match socket.read(&mut self.read_buf) {
            Ok(0) => {
                debug!(fd, "peer closed connection");
                self.evict(index);
                ClientState::Evicted
            }
            Ok(n) => {
                trace!(fd, bytes = n, "read payload");
                if !self.callbacks.notify_message(&self.read_buf[..n]) {
                    trace!(fd, bytes = n, "no message callback, payload dropped");
                }
                ClientState::Open
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                ClientState::Open
            }
            Err(source) => {
                let err = NetError::ReadFailed { fd, source };
                warn!(error = %err, "closing connection");
                self.emit(ManagerEvent::ReadFailed {
                    fd,
                    reason: err.to_string(),
                });
                self.evict(index);
                ClientState::Evicted
            }
        }
    }

    // Only ever called for client slots, so listeners keep their prefix.
    fn evict(&mut self, index: usize) {
        if let Some(socket) = self.table.remove_at(index) {
            let fd = socket.as_raw_fd();
            drop(socket);
            self.emit(ManagerEvent::Disconnected { fd });
        }
    }

    fn emit(&self, event: ManagerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Register a consumer for accepted connections. All consumers run, in
    /// registration order, for every accepted connection.
    pub fn add_accept_callback(&mut self, callback: impl OnAccept + 'static) {
        self.callbacks.add_accept(callback);
    }

    /// Install the consumer for received payloads, replacing any previous
    /// one.
    pub fn set_message_callback(&mut self, callback: impl OnMessage + 'static) {
        self.callbacks.set_message(callback);
    }

    /// Subscribe to lifecycle events. A new call replaces the previous
    /// subscriber.
    pub fn monitor(&mut self) -> EventMonitor {
        let (sender, receiver) = create_monitor();
        self.events = Some(sender);
        receiver
    }

    /// Port shared by every interface.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Options the manager was built with.
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Successfully bound interfaces, in bind order.
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Number of successfully bound interfaces.
    pub fn num_interfaces(&self) -> usize {
        self.interfaces.len()
    }

    /// Number of listener entries at the front of the table.
    pub fn listener_count(&self) -> usize {
        2 * self.interfaces.len()
    }

    /// Number of watched descriptors, listeners included.
    pub fn descriptor_count(&self) -> usize {
        self.table.len()
    }

    /// Allocated descriptor slots.
    pub fn table_capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Watched descriptors in table order.
    pub fn descriptors(&self) -> impl Iterator<Item = WatchedDescriptor> + '_ {
        self.table.iter()
    }

    /// Datagram socket of the interface bound `interface`-th.
    ///
    /// The loop only observes datagram readiness; reading and sending
    /// datagrams belongs to the caller.
    pub fn udp_socket(&self, interface: usize) -> Option<&Socket> {
        if interface < self.interfaces.len() {
            self.table.get(2 * interface + 1)
        } else {
            None
        }
    }

    /// Close every listener and client descriptor.
    pub fn shutdown(mut self) {
        self.close_all();
    }

    fn close_all(&mut self) {
        if self.table.is_empty() {
            return;
        }
        let closed = self.table.clear();
        self.interfaces.clear();
        info!(closed, "closed all descriptors");
        self.emit(ManagerEvent::Shutdown { closed });
    }
}

impl Drop for NetManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for NetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetManager")
            .field("port", &self.port)
            .field("interfaces", &self.interfaces)
            .field("table", &self.table)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Accept one pending connection and make it non-blocking.
///
/// `Ok(None)` means the readiness was stale and nothing was pending.
fn accept_client(listener: &Socket) -> io::Result<Option<(Socket, SocketAddr)>> {
    let (client, addr) = match listener.accept() {
        Ok(accepted) => accepted,
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            return Ok(None)
        }
        Err(e) => return Err(e),
    };

    client.set_nonblocking(true)?;
    let peer = addr.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "peer address is not an IP address")
    })?;

    Ok(Some((client, peer)))
}

//! # Netmux
//!
//! A single-threaded connection manager that shares one port across any
//! number of network interfaces, for both TCP and UDP, and drives everything
//! from a cooperative `poll(2)` loop.
//!
//! ## Architecture
//!
//! - **`netmux-core`**: interface binding, descriptor table, poll loop,
//!   callbacks, monitoring
//! - **`netmux`**: public API surface (this crate)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netmux::prelude::*;
//! use std::net::SocketAddr;
//! use std::os::fd::RawFd;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = NetManager::new("5154");
//! manager.bind("0.0.0.0")?;
//! manager.bind("::")?;
//!
//! manager.add_accept_callback(|peer: SocketAddr, fd: RawFd| {
//!     println!("accepted {peer} on descriptor {fd}");
//! });
//! manager.set_message_callback(|payload: &[u8]| {
//!     println!("received {}", String::from_utf8_lossy(payload));
//! });
//!
//! let token = CancelToken::new();
//! manager.run(&token)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Behavior
//!
//! - Every watched descriptor is non-blocking; `process()` waits at most the
//!   configured poll timeout (50ms by default)
//! - One accept per ready listener per cycle
//! - Payloads are raw read chunks (1024 bytes max by default); no framing
//! - Datagram sockets are watched but never read by the loop; use
//!   [`NetManager::udp_socket`](prelude::NetManager::udp_socket), usually
//!   from a [`NetManager::run_with`](prelude::NetManager::run_with) hook

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dev_tracing;

// Re-export the socket type handed out by `NetManager::udp_socket`
pub use socket2::Socket;

pub use netmux_core::{binder, callbacks, cancel, error, manager, monitor, options, table};

/// Everything needed to embed a manager.
pub mod prelude {
    pub use netmux_core::prelude::*;
}
